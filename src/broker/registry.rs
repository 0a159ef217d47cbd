//! Registry of connected providers and their published tools.
//!
//! The registry preserves registration order (that order is what consumers
//! see in `tools/list`) and implements the replacement-on-reconnect policy:
//! re-registering an id evicts the previous entry so its channel can be
//! closed with a "replaced" reason.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::session::protocol::{BrokerFrame, ToolDescriptor};
use crate::types::ProviderId;

/// Command consumed by a session's writer task.
///
/// Queuing commands on an unbounded channel serializes all writes to one
/// provider channel without holding any lock across the socket.
#[derive(Debug)]
pub enum SessionCommand {
    Frame(BrokerFrame),
    Close { reason: String },
}

/// Send side of one provider session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: u64,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(session_id: u64, tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { session_id, tx }
    }

    /// Unique id of the owning session, used to guard terminal transitions
    /// against sessions that were already replaced.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Queue a frame. A closed channel means the session is gone; the frame
    /// is dropped and the pending call (if any) is left to its deadline.
    pub fn send(&self, frame: BrokerFrame) {
        let _ = self.tx.send(SessionCommand::Frame(frame));
    }

    /// Queue a close with the given reason.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.tx.send(SessionCommand::Close {
            reason: reason.into(),
        });
    }
}

/// One registered provider.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub id: ProviderId,
    pub session: SessionHandle,
    pub tools: Vec<ToolDescriptor>,
    pub connected_at: DateTime<Utc>,
}

/// Ordered map of provider id to entry.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<ProviderEntry>,
}

impl Registry {
    /// Install an entry, returning the evicted previous entry for the same
    /// id if there was one. A replacement keeps the original position.
    pub fn insert_or_replace(&mut self, entry: ProviderEntry) -> Option<ProviderEntry> {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => Some(std::mem::replace(slot, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    pub fn lookup(&self, id: &ProviderId) -> Option<&ProviderEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Remove an entry. Idempotent.
    pub fn remove(&mut self, id: &ProviderId) -> Option<ProviderEntry> {
        let index = self.entries.iter().position(|e| &e.id == id)?;
        Some(self.entries.remove(index))
    }

    /// All entries in registration order.
    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of published tools across all providers.
    pub fn tool_count(&self) -> usize {
        self.entries.iter().map(|e| e.tools.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle(session_id: u64) -> SessionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        SessionHandle::new(session_id, tx)
    }

    fn entry(id: &str, session_id: u64) -> ProviderEntry {
        ProviderEntry {
            id: ProviderId::new(id),
            session: handle(session_id),
            tools: vec![ToolDescriptor {
                name: "noop".to_string(),
                description: String::new(),
                input_schema: json!({"type": "object", "properties": {}}),
            }],
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn insert_preserves_registration_order() {
        let mut registry = Registry::default();
        registry.insert_or_replace(entry("b", 1));
        registry.insert_or_replace(entry("a", 2));
        let ids: Vec<_> = registry.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn replace_returns_evicted_entry_and_keeps_position() {
        let mut registry = Registry::default();
        registry.insert_or_replace(entry("svc", 1));
        registry.insert_or_replace(entry("other", 2));

        let evicted = registry.insert_or_replace(entry("svc", 3)).unwrap();
        assert_eq!(evicted.session.session_id(), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.entries()[0].id.as_str(), "svc");
        assert_eq!(registry.entries()[0].session.session_id(), 3);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = Registry::default();
        registry.insert_or_replace(entry("svc", 1));
        assert!(registry.remove(&ProviderId::new("svc")).is_some());
        assert!(registry.remove(&ProviderId::new("svc")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn tool_count_sums_all_providers() {
        let mut registry = Registry::default();
        registry.insert_or_replace(entry("a", 1));
        registry.insert_or_replace(entry("b", 2));
        assert_eq!(registry.tool_count(), 2);
    }

    #[test]
    fn closed_session_send_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let session = SessionHandle::new(9, tx);
        session.send(BrokerFrame::Error {
            message: "ignored".to_string(),
        });
        session.close("ignored");
    }
}

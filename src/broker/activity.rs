//! Bounded activity log, notification rings, and stats counters.
//!
//! All three are plain in-memory structures; the [`Broker`](super::Broker)
//! guards them with its state lock and pairs every append with the matching
//! observer broadcast.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use crate::types::ProviderId;

/// Maximum retained activity entries.
pub const ACTIVITY_CAP: usize = 200;
/// Maximum retained notifications per provider.
pub const PROVIDER_NOTIFICATION_CAP: usize = 100;
/// Maximum retained notifications across all providers.
pub const GLOBAL_NOTIFICATION_CAP: usize = 500;

/// What an activity entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Connect,
    Disconnect,
    ToolCall,
    ToolResult,
    ToolError,
    Chat,
    ChatError,
    Notification,
}

/// One entry of the activity log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub time: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActivityEntry {
    /// The provider id carried in this entry's `data`, if any.
    pub fn client_id(&self) -> Option<&str> {
        self.data.as_ref()?.get("clientId")?.as_str()
    }
}

/// Append-only ring of recent activity.
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
}

impl ActivityLog {
    /// Append an entry, discarding the oldest when full. Returns a clone of
    /// the stored entry for broadcasting.
    pub fn push(&mut self, kind: ActivityKind, message: String, data: Option<Value>) -> ActivityEntry {
        let entry = ActivityEntry {
            time: Utc::now(),
            kind,
            message,
            data,
        };
        if self.entries.len() == ACTIVITY_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Retained entries whose data names the given provider.
    pub fn entries_for(&self, id: &ProviderId) -> Vec<ActivityEntry> {
        self.entries
            .iter()
            .filter(|e| e.client_id() == Some(id.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A stored provider notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub client_id: ProviderId,
    pub event: Value,
    pub time: DateTime<Utc>,
}

/// Per-provider and global notification rings.
#[derive(Debug, Default)]
pub struct NotificationStore {
    per_provider: HashMap<ProviderId, VecDeque<NotificationRecord>>,
    global: VecDeque<NotificationRecord>,
}

impl NotificationStore {
    /// Store an event in both rings and return the stored record.
    pub fn push(&mut self, id: &ProviderId, event: Value) -> NotificationRecord {
        let record = NotificationRecord {
            client_id: id.clone(),
            event,
            time: Utc::now(),
        };

        let ring = self.per_provider.entry(id.clone()).or_default();
        if ring.len() == PROVIDER_NOTIFICATION_CAP {
            ring.pop_front();
        }
        ring.push_back(record.clone());

        if self.global.len() == GLOBAL_NOTIFICATION_CAP {
            self.global.pop_front();
        }
        self.global.push_back(record.clone());

        record
    }

    /// The most recent `limit` notifications, oldest first. With a provider
    /// id the per-provider ring is consulted, otherwise the global ring.
    pub fn recent(&self, id: Option<&ProviderId>, limit: usize) -> Vec<NotificationRecord> {
        let ring = match id {
            Some(id) => match self.per_provider.get(id) {
                Some(ring) => ring,
                None => return Vec::new(),
            },
            None => &self.global,
        };
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Number of stored notifications for one provider.
    pub fn count_for(&self, id: &ProviderId) -> usize {
        self.per_provider.get(id).map_or(0, VecDeque::len)
    }

    /// Drop a provider's ring. The global ring keeps its copies.
    pub fn clear_provider(&mut self, id: &ProviderId) {
        self.per_provider.remove(id);
    }
}

/// Monotonic counters exposed in state snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub chat_requests: u64,
    pub chat_errors: u64,
    pub total_connections: u64,
    pub notifications: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activity_log_never_exceeds_cap() {
        let mut log = ActivityLog::default();
        for i in 0..(ACTIVITY_CAP + 25) {
            log.push(ActivityKind::ToolCall, format!("call {i}"), None);
        }
        assert_eq!(log.len(), ACTIVITY_CAP);
        // Oldest entries were discarded.
        assert_eq!(log.entries()[0].message, "call 25");
    }

    #[test]
    fn activity_filter_matches_client_id_data() {
        let mut log = ActivityLog::default();
        log.push(
            ActivityKind::Connect,
            "clock connected".to_string(),
            Some(json!({"clientId": "clock"})),
        );
        log.push(ActivityKind::ToolCall, "unrelated".to_string(), None);

        let clock = ProviderId::new("clock");
        let filtered = log.entries_for(&clock);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].message, "clock connected");
    }

    #[test]
    fn notification_rings_respect_caps() {
        let mut store = NotificationStore::default();
        let id = ProviderId::new("clock");
        for i in 0..(GLOBAL_NOTIFICATION_CAP + 10) {
            store.push(&id, json!({"tick": i}));
        }
        assert_eq!(store.count_for(&id), PROVIDER_NOTIFICATION_CAP);
        assert_eq!(store.recent(None, usize::MAX).len(), GLOBAL_NOTIFICATION_CAP);
    }

    #[test]
    fn recent_returns_newest_entries_in_order() {
        let mut store = NotificationStore::default();
        let id = ProviderId::new("clock");
        for i in 0..5 {
            store.push(&id, json!({"tick": i}));
        }
        let recent = store.recent(Some(&id), 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event, json!({"tick": 3}));
        assert_eq!(recent[1].event, json!({"tick": 4}));
    }

    #[test]
    fn recent_for_unknown_provider_is_empty() {
        let store = NotificationStore::default();
        assert!(store.recent(Some(&ProviderId::new("ghost")), 10).is_empty());
    }

    #[test]
    fn clear_provider_keeps_global_ring() {
        let mut store = NotificationStore::default();
        let id = ProviderId::new("clock");
        store.push(&id, json!({"tick": 1}));
        store.clear_provider(&id);
        assert_eq!(store.count_for(&id), 0);
        assert_eq!(store.recent(None, 10).len(), 1);
    }
}

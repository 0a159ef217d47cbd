//! Observer-facing event frames and state snapshots.
//!
//! Every frame serializes as a single JSON object with a `type` tag, which is
//! exactly what the SSE endpoints put on the wire.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::activity::{ActivityEntry, NotificationRecord, Stats};
use crate::session::protocol::ToolDescriptor;
use crate::types::ProviderId;

/// One provider as reported in a state snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub client_id: ProviderId,
    pub connected_at: DateTime<Utc>,
    pub tools: Vec<ToolDescriptor>,
}

/// Process-wide state snapshot for `/api/status` and `state` frames.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Seconds since the broker started.
    pub uptime: u64,
    pub started_at: DateTime<Utc>,
    pub connected_clients: usize,
    pub total_tools: usize,
    pub stats: Stats,
    pub clients: Vec<ClientSummary>,
}

/// Per-provider snapshot for `/api/client/{id}/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub client_id: ProviderId,
    pub connected_at: DateTime<Utc>,
    pub tools: Vec<ToolDescriptor>,
    /// Notifications currently retained for this provider.
    pub notifications: usize,
}

/// A frame fanned out to live observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventFrame {
    State(StateSnapshot),
    Activity { entry: ActivityEntry },
    Notification(NotificationRecord),
}

impl EventFrame {
    /// The provider this frame concerns, when it concerns exactly one.
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::State(_) => None,
            Self::Activity { entry } => entry.client_id(),
            Self::Notification(record) => Some(record.client_id.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::activity::ActivityKind;
    use serde_json::json;

    #[test]
    fn frames_carry_a_type_tag() {
        let frame = EventFrame::Notification(NotificationRecord {
            client_id: ProviderId::new("clock"),
            event: json!({"type": "tick", "t": 1}),
            time: Utc::now(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["clientId"], "clock");
        assert_eq!(value["event"]["t"], 1);
    }

    #[test]
    fn activity_frames_nest_the_entry() {
        let frame = EventFrame::Activity {
            entry: ActivityEntry {
                time: Utc::now(),
                kind: ActivityKind::Connect,
                message: "clock connected".to_string(),
                data: Some(json!({"clientId": "clock"})),
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "activity");
        assert_eq!(value["entry"]["kind"], "connect");
        assert_eq!(frame.client_id(), Some("clock"));
    }

    #[test]
    fn state_frames_flatten_the_snapshot() {
        let frame = EventFrame::State(StateSnapshot {
            uptime: 3,
            started_at: Utc::now(),
            connected_clients: 0,
            total_tools: 0,
            stats: Stats::default(),
            clients: Vec::new(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["connectedClients"], 0);
        assert_eq!(value["stats"]["toolCalls"], 0);
    }
}

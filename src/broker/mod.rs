//! Process-wide broker state: registry, correlators, activity log,
//! notification rings, stats, and the observer fan-out channel.
//!
//! All mutations of the shared structures happen inside one state lock, and
//! every activity append broadcasts its frame inside the same critical
//! section, so observers see events in exactly the order state changed.

pub mod activity;
pub mod correlator;
pub mod events;
pub mod registry;
pub mod router;

use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rmcp::model::JsonObject;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::chat::{ChatOutcome, ChatProxy};
use crate::config::BrokerConfig;
use crate::session::protocol::{BrokerFrame, ChatPayload, ChatReply, ToolDescriptor};
use crate::types::{CallId, ProviderId};

use self::activity::{
    ActivityEntry, ActivityKind, ActivityLog, NotificationRecord, NotificationStore, Stats,
};
use self::correlator::{CorrelationError, Correlator};
use self::events::{ClientStatus, ClientSummary, EventFrame, StateSnapshot};
use self::registry::{ProviderEntry, Registry, SessionHandle};
use self::router::{RouteError, ToolOutput};

const LOCK: &str = "broker state lock poisoned";

/// Capacity of the observer broadcast channel. A subscriber that falls this
/// far behind starts losing frames instead of blocking anyone else.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct BrokerInner {
    registry: Registry,
    activity: ActivityLog,
    notifications: NotificationStore,
    stats: Stats,
}

/// The shared broker core.
pub struct Broker {
    config: BrokerConfig,
    started_at: DateTime<Utc>,
    started: Instant,
    inner: Mutex<BrokerInner>,
    calls: Correlator<ToolOutput>,
    chats: Correlator<ChatOutcome>,
    events: broadcast::Sender<EventFrame>,
    chat_proxy: ChatProxy,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let chat_proxy = ChatProxy::new(&config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            started_at: Utc::now(),
            started: Instant::now(),
            inner: Mutex::new(BrokerInner::default()),
            calls: Correlator::new(),
            chats: Correlator::new(),
            events,
            config,
            chat_proxy,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn chat_proxy(&self) -> &ChatProxy {
        &self.chat_proxy
    }

    /// Pending tool-call correlator.
    pub fn calls(&self) -> &Correlator<ToolOutput> {
        &self.calls
    }

    /// Pending chat-request correlator (separate keyspace).
    pub fn chats(&self) -> &Correlator<ChatOutcome> {
        &self.chats
    }

    /// Subscribe to the observer event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Registration lifecycle
    // ------------------------------------------------------------------

    /// Install a provider registration, replacing any prior entry with the
    /// same id. The evicted entry's channel is closed with a "replaced"
    /// reason, then the new session's `registered` acknowledgement is queued,
    /// all inside the registry critical section. A tool call can only be
    /// dispatched after a registry lookup, which must come after this
    /// section, so no provider sees a `tool_call` ahead of its `registered`
    /// frame.
    ///
    /// Returns the assigned (sanitized or generated) provider id.
    pub fn register(
        &self,
        requested: Option<&str>,
        tools: Vec<ToolDescriptor>,
        session: SessionHandle,
    ) -> ProviderId {
        let id = requested
            .and_then(ProviderId::sanitize)
            .unwrap_or_else(ProviderId::random);
        let tool_count = tools.len();
        let ack = session.clone();

        let mut inner = self.inner.lock().expect(LOCK);
        let evicted = inner.registry.insert_or_replace(ProviderEntry {
            id: id.clone(),
            session,
            tools,
            connected_at: Utc::now(),
        });
        if let Some(old) = evicted {
            old.session.close("Replaced by new connection");
            tracing::info!(client_id = %id, "provider replaced by reconnect");
            self.record(
                &mut inner,
                ActivityKind::Disconnect,
                format!("{id} replaced by reconnect"),
                Some(json!({"clientId": id.as_str()})),
            );
        }
        ack.send(BrokerFrame::Registered {
            client_id: id.clone(),
        });
        inner.stats.total_connections += 1;
        tracing::info!(client_id = %id, tools = tool_count, "provider registered");
        self.record(
            &mut inner,
            ActivityKind::Connect,
            format!("{id} connected with {tool_count} tool(s)"),
            Some(json!({"clientId": id.as_str(), "tools": tool_count})),
        );
        self.broadcast_state(&inner);
        id
    }

    /// Run the terminal transition for a session, if it still owns the
    /// registry entry for `id`.
    ///
    /// A session that was replaced by a reconnect no longer owns its entry;
    /// its close is then a no-op, which is also what preserves notification
    /// history across a replacement. Returns whether the entry was removed.
    pub fn unregister_session(&self, id: &ProviderId, session_id: u64, reason: &str) -> bool {
        let mut inner = self.inner.lock().expect(LOCK);
        let owns = inner
            .registry
            .lookup(id)
            .is_some_and(|e| e.session.session_id() == session_id);
        if !owns {
            return false;
        }
        inner.registry.remove(id);
        inner.notifications.clear_provider(id);
        tracing::info!(client_id = %id, reason, "provider disconnected");
        self.record(
            &mut inner,
            ActivityKind::Disconnect,
            format!("{id} disconnected ({reason})"),
            Some(json!({"clientId": id.as_str()})),
        );
        self.broadcast_state(&inner);
        true
    }

    /// Whether the given session still owns the registry entry for `id`.
    pub fn session_owns(&self, id: &ProviderId, session_id: u64) -> bool {
        self.inner
            .lock()
            .expect(LOCK)
            .registry
            .lookup(id)
            .is_some_and(|e| e.session.session_id() == session_id)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Store a provider notification and fan it out.
    ///
    /// Returns the storage timestamp for the acknowledgement frame, or
    /// `None` when the session no longer owns the registry entry (the event
    /// is then rejected, not stored).
    pub fn push_notification(
        &self,
        id: &ProviderId,
        session_id: u64,
        event: Value,
    ) -> Option<DateTime<Utc>> {
        let mut inner = self.inner.lock().expect(LOCK);
        let owns = inner
            .registry
            .lookup(id)
            .is_some_and(|e| e.session.session_id() == session_id);
        if !owns {
            return None;
        }
        let record = inner.notifications.push(id, event);
        inner.stats.notifications += 1;
        self.record(
            &mut inner,
            ActivityKind::Notification,
            format!("notification from {id}"),
            Some(json!({"clientId": id.as_str(), "event": record.event.clone()})),
        );
        let _ = self.events.send(EventFrame::Notification(record.clone()));
        Some(record.time)
    }

    /// The most recent notifications, per-provider or global.
    pub fn recent_notifications(
        &self,
        id: Option<&ProviderId>,
        limit: usize,
    ) -> Vec<NotificationRecord> {
        self.inner.lock().expect(LOCK).notifications.recent(id, limit)
    }

    // ------------------------------------------------------------------
    // Tool dispatch
    // ------------------------------------------------------------------

    /// Send a tool call to a registered provider and await its result.
    pub async fn dispatch_tool(
        &self,
        id: &ProviderId,
        tool: &str,
        arguments: JsonObject,
    ) -> Result<ToolOutput, RouteError> {
        let session = {
            let inner = self.inner.lock().expect(LOCK);
            inner.registry.lookup(id).map(|e| e.session.clone())
        }
        .ok_or_else(|| RouteError::NotConnected(id.clone()))?;

        let call_id = CallId::generate();
        tracing::debug!(client_id = %id, tool, call_id = %call_id, "dispatching tool call");
        let rx = self
            .calls
            .begin(call_id.as_str(), self.config.tool_call_deadline);
        session.send(BrokerFrame::ToolCall {
            call_id,
            tool: tool.to_string(),
            arguments,
        });

        match rx.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(CorrelationError::TimedOut(after))) => Err(RouteError::Timeout(after)),
            Err(_) => Err(RouteError::Abandoned),
        }
    }

    // ------------------------------------------------------------------
    // Chat proxying
    // ------------------------------------------------------------------

    /// Proxy a provider chat request through the upstream endpoint.
    ///
    /// The request is tracked in the chat correlator keyspace under the
    /// provider-supplied request id with the chat deadline; the upstream
    /// call runs in its own task and completes the entry.
    pub async fn proxy_chat(
        &self,
        id: &ProviderId,
        request_id: &str,
        payload: ChatPayload,
    ) -> Result<ChatReply, String> {
        self.note_chat_request(
            format!("chat request from {id}"),
            Some(json!({"clientId": id.as_str()})),
        );

        let rx = self.chats.begin(request_id, self.config.chat_deadline);
        let proxy = self.chat_proxy.clone();
        let chats = self.chats.clone();
        let rid = request_id.to_string();
        tokio::spawn(async move {
            let outcome = proxy.chat(&payload).await.map_err(|e| e.to_string());
            chats.complete(&rid, outcome);
        });

        let outcome = match rx.await {
            Ok(Ok(result)) => result,
            Ok(Err(timeout)) => Err(timeout.to_string()),
            Err(_) => Err("chat request abandoned".to_string()),
        };
        if let Err(message) = &outcome {
            self.note_chat_error(message);
        }
        outcome
    }

    /// One-shot upstream generation for built-ins and dashboard endpoints.
    ///
    /// Returns the generated text and the resolved model name.
    pub async fn generate(
        &self,
        origin: &str,
        prompt: &str,
        system: Option<&str>,
        model: Option<&str>,
    ) -> Result<(String, String), String> {
        self.note_chat_request(format!("chat request via {origin}"), None);
        let resolved = self.chat_proxy.resolve_model(model);
        match self
            .chat_proxy
            .generate(prompt, system, Some(resolved.as_str()))
            .await
        {
            Ok(text) => Ok((text, resolved)),
            Err(err) => {
                let message = err.to_string();
                self.note_chat_error(&message);
                Err(message)
            }
        }
    }

    pub(crate) fn note_chat_request(&self, message: String, data: Option<Value>) {
        let mut inner = self.inner.lock().expect(LOCK);
        inner.stats.chat_requests += 1;
        self.record(&mut inner, ActivityKind::Chat, message, data);
    }

    pub(crate) fn note_chat_error(&self, message: &str) {
        let mut inner = self.inner.lock().expect(LOCK);
        inner.stats.chat_errors += 1;
        self.record(
            &mut inner,
            ActivityKind::ChatError,
            format!("chat error: {message}"),
            None,
        );
    }

    // ------------------------------------------------------------------
    // Routing bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn note_tool_call(&self, name: &str, client: Option<&ProviderId>) {
        let mut inner = self.inner.lock().expect(LOCK);
        inner.stats.tool_calls += 1;
        let data = match client {
            Some(id) => json!({"tool": name, "clientId": id.as_str()}),
            None => json!({"tool": name}),
        };
        self.record(
            &mut inner,
            ActivityKind::ToolCall,
            format!("tool call: {name}"),
            Some(data),
        );
    }

    pub(crate) fn note_tool_result(
        &self,
        name: &str,
        client: Option<&ProviderId>,
        error: Option<&str>,
    ) {
        let mut inner = self.inner.lock().expect(LOCK);
        let data = match client {
            Some(id) => json!({"tool": name, "clientId": id.as_str()}),
            None => json!({"tool": name}),
        };
        match error {
            Some(detail) => {
                inner.stats.tool_errors += 1;
                self.record(
                    &mut inner,
                    ActivityKind::ToolError,
                    format!("tool error: {name}: {detail}"),
                    Some(data),
                );
            }
            None => {
                self.record(
                    &mut inner,
                    ActivityKind::ToolResult,
                    format!("tool result: {name}"),
                    Some(data),
                );
            }
        }
    }

    /// Append an activity entry and broadcast it in the same critical
    /// section, keeping fan-out order identical to state-change order.
    fn record(
        &self,
        inner: &mut BrokerInner,
        kind: ActivityKind,
        message: String,
        data: Option<Value>,
    ) {
        let entry = inner.activity.push(kind, message, data);
        let _ = self.events.send(EventFrame::Activity { entry });
    }

    fn broadcast_state(&self, inner: &BrokerInner) {
        let _ = self.events.send(EventFrame::State(self.snapshot_of(inner)));
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().expect(LOCK);
        self.snapshot_of(&inner)
    }

    fn snapshot_of(&self, inner: &BrokerInner) -> StateSnapshot {
        StateSnapshot {
            uptime: self.started.elapsed().as_secs(),
            started_at: self.started_at,
            connected_clients: inner.registry.len(),
            total_tools: inner.registry.tool_count(),
            stats: inner.stats,
            clients: inner
                .registry
                .entries()
                .iter()
                .map(|e| ClientSummary {
                    client_id: e.id.clone(),
                    connected_at: e.connected_at,
                    tools: e.tools.clone(),
                })
                .collect(),
        }
    }

    pub fn client_status(&self, id: &ProviderId) -> Option<ClientStatus> {
        let inner = self.inner.lock().expect(LOCK);
        let entry = inner.registry.lookup(id)?;
        Some(ClientStatus {
            client_id: entry.id.clone(),
            connected_at: entry.connected_at,
            tools: entry.tools.clone(),
            notifications: inner.notifications.count_for(id),
        })
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.inner.lock().expect(LOCK).activity.entries()
    }

    pub fn client_activity(&self, id: &ProviderId) -> Vec<ActivityEntry> {
        self.inner.lock().expect(LOCK).activity.entries_for(id)
    }

    pub fn stats(&self) -> Stats {
        self.inner.lock().expect(LOCK).stats
    }

    /// Every published provider tool in registration order, for list output.
    pub fn provider_tools(&self) -> Vec<(ProviderId, ToolDescriptor)> {
        let inner = self.inner.lock().expect(LOCK);
        inner
            .registry
            .entries()
            .iter()
            .flat_map(|e| e.tools.iter().map(|t| (e.id.clone(), t.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::registry::SessionCommand;
    use tokio::sync::mpsc;

    fn test_broker() -> Broker {
        Broker::new(BrokerConfig::default()).unwrap()
    }

    fn session(
        session_id: u64,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(session_id, tx), rx)
    }

    fn greet_tool() -> ToolDescriptor {
        ToolDescriptor {
            name: "greet".to_string(),
            description: "Say hello".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    #[tokio::test]
    async fn register_assigns_sanitized_id() {
        let broker = test_broker();
        let (handle, _rx) = session(1);
        let id = broker.register(Some("héllo!"), vec![], handle);
        assert_eq!(id.as_str(), "h_llo_");
        assert_eq!(broker.snapshot().connected_clients, 1);
    }

    #[tokio::test]
    async fn register_without_usable_id_generates_one() {
        let broker = test_broker();
        let (handle, _rx) = session(1);
        let id = broker.register(None, vec![], handle);
        assert!(id.as_str().starts_with("rc_"));
    }

    #[tokio::test]
    async fn reconnect_replaces_and_closes_old_channel() {
        let broker = test_broker();
        let (first, mut first_rx) = session(1);
        let (second, _second_rx) = session(2);

        broker.register(Some("svc"), vec![greet_tool()], first);
        broker.register(Some("svc"), vec![greet_tool()], second);

        match first_rx.recv().await {
            Some(SessionCommand::Frame(BrokerFrame::Registered { client_id })) => {
                assert_eq!(client_id.as_str(), "svc");
            }
            other => panic!("expected registered frame, got {other:?}"),
        }
        match first_rx.recv().await {
            Some(SessionCommand::Close { reason }) => {
                assert_eq!(reason, "Replaced by new connection");
            }
            other => panic!("expected close command, got {other:?}"),
        }

        let snapshot = broker.snapshot();
        assert_eq!(snapshot.connected_clients, 1);
        assert_eq!(snapshot.stats.total_connections, 2);
    }

    #[tokio::test]
    async fn replaced_session_close_does_not_remove_new_entry() {
        let broker = test_broker();
        let (first, _rx1) = session(1);
        let (second, _rx2) = session(2);
        let id = broker.register(Some("svc"), vec![], first);
        broker.register(Some("svc"), vec![], second);

        // The replaced session runs its terminal transition late.
        assert!(!broker.unregister_session(&id, 1, "connection closed"));
        assert_eq!(broker.snapshot().connected_clients, 1);

        // The current session's close does remove the entry.
        assert!(broker.unregister_session(&id, 2, "connection closed"));
        assert_eq!(broker.snapshot().connected_clients, 0);
    }

    #[tokio::test]
    async fn replacement_preserves_notification_history() {
        let broker = test_broker();
        let (first, _rx1) = session(1);
        let id = broker.register(Some("svc"), vec![], first);
        broker
            .push_notification(&id, 1, json!({"type": "tick", "t": 1}))
            .unwrap();

        let (second, _rx2) = session(2);
        broker.register(Some("svc"), vec![], second);
        // Old session's late close is a no-op, so the ring survives.
        broker.unregister_session(&id, 1, "connection closed");
        assert_eq!(broker.recent_notifications(Some(&id), 50).len(), 1);

        // An explicit disconnect of the owning session clears it.
        broker.unregister_session(&id, 2, "unregistered");
        assert!(broker.recent_notifications(Some(&id), 50).is_empty());
    }

    #[tokio::test]
    async fn notification_from_stale_session_is_rejected() {
        let broker = test_broker();
        let (first, _rx1) = session(1);
        let (second, _rx2) = session(2);
        let id = broker.register(Some("svc"), vec![], first);
        broker.register(Some("svc"), vec![], second);

        assert!(broker.push_notification(&id, 1, json!({"t": 1})).is_none());
        assert!(broker.push_notification(&id, 2, json!({"t": 2})).is_some());
        assert_eq!(broker.recent_notifications(Some(&id), 50).len(), 1);
    }

    #[tokio::test]
    async fn dispatch_round_trips_through_the_correlator() {
        let broker = std::sync::Arc::new(test_broker());
        let (handle, mut rx) = session(1);
        let id = broker.register(Some("hello-world"), vec![greet_tool()], handle);

        let responder = {
            let broker = broker.clone();
            tokio::spawn(async move {
                // The first frame on a fresh session is the registration ack.
                while let Some(command) = rx.recv().await {
                    if let SessionCommand::Frame(BrokerFrame::ToolCall {
                        call_id,
                        tool,
                        arguments,
                    }) = command
                    {
                        assert_eq!(tool, "greet");
                        assert_eq!(arguments.get("name"), Some(&json!("World")));
                        broker.calls().complete(
                            call_id.as_str(),
                            ToolOutput {
                                content: vec![json!({"type": "text", "text": "Hello, World!"})],
                                is_error: false,
                            },
                        );
                        break;
                    }
                }
            })
        };

        let mut arguments = JsonObject::new();
        arguments.insert("name".to_string(), json!("World"));
        let output = broker.dispatch_tool(&id, "greet", arguments).await.unwrap();
        assert!(!output.is_error);
        assert_eq!(output.content[0]["text"], "Hello, World!");
        assert!(broker.calls().is_empty());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_to_unknown_provider_fails() {
        let broker = test_broker();
        let err = broker
            .dispatch_tool(&ProviderId::new("ghost"), "x", JsonObject::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Broker client \"ghost\" not connected");
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_times_out_when_provider_never_answers() {
        let broker = test_broker();
        let (handle, _rx) = session(1);
        let id = broker.register(Some("slow"), vec![], handle);

        let err = broker
            .dispatch_tool(&id, "noop", JsonObject::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn events_fan_out_in_state_change_order() {
        let broker = test_broker();
        let mut rx = broker.subscribe();
        let (handle, _srx) = session(1);
        broker.register(Some("svc"), vec![], handle);

        match rx.recv().await.unwrap() {
            EventFrame::Activity { entry } => {
                assert!(matches!(entry.kind, ActivityKind::Connect));
            }
            other => panic!("expected activity frame, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            EventFrame::State(snapshot) => {
                assert_eq!(snapshot.connected_clients, 1);
            }
            other => panic!("expected state frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stats_counters_never_decrease() {
        let broker = test_broker();
        broker.note_tool_call("greet", None);
        broker.note_tool_result("greet", None, Some("boom"));
        let stats = broker.stats();
        assert_eq!(stats.tool_calls, 1);
        assert_eq!(stats.tool_errors, 1);
        assert!(stats.tool_calls >= stats.tool_errors);
    }
}

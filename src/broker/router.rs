//! Tool name resolution and invocation.
//!
//! Every tool call — from MCP consumers, the dashboard, or a provider's own
//! `call_tool` frame — goes through [`ToolRouter::route`], which resolves
//! built-ins first, then namespaced provider tools, and folds every failure
//! into a well-formed `{content, isError}` result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::JsonObject;
use serde_json::{Value, json};

use super::Broker;
use crate::tools::BuiltinTools;
use crate::types::{ProviderId, split_namespaced};

/// The result shape providers and built-ins produce.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Content items, usually `{"type":"text","text":…}` objects.
    pub content: Vec<Value>,
    pub is_error: bool,
}

impl ToolOutput {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({"type": "text", "text": text.into()})],
            is_error: false,
        }
    }

    /// A failed single-text result.
    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({"type": "text", "text": text.into()})],
            is_error: true,
        }
    }

    /// The first text item, for activity messages.
    pub fn summary(&self) -> String {
        self.content
            .iter()
            .find_map(|item| item.get("text").and_then(Value::as_str))
            .unwrap_or("(no text content)")
            .to_string()
    }
}

/// Failures produced by routing itself (as opposed to errors a provider
/// reports inside a `tool_result`, which pass through unchanged).
#[derive(Debug)]
pub enum RouteError {
    /// The name is neither a built-in nor namespaced.
    UnknownTool(String),
    /// The namespaced provider is not registered.
    NotConnected(ProviderId),
    /// The provider did not answer within the deadline.
    Timeout(Duration),
    /// The pending call was dropped without an outcome.
    Abandoned,
    /// A built-in rejected its arguments.
    InvalidArguments(String),
    /// The upstream model call behind a built-in failed.
    Upstream(String),
    /// Internal serialization failure.
    Internal(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool(name) => write!(f, "Unknown tool: {name}"),
            Self::NotConnected(id) => write!(f, "Broker client \"{id}\" not connected"),
            Self::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            Self::Abandoned => write!(f, "call abandoned before completion"),
            Self::InvalidArguments(message) => write!(f, "{message}"),
            Self::Upstream(message) => write!(f, "{message}"),
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for RouteError {}

/// Resolves tool names and invokes the target.
pub struct ToolRouter {
    broker: Arc<Broker>,
    builtins: BuiltinTools,
}

impl ToolRouter {
    pub fn new(broker: Arc<Broker>, builtins: BuiltinTools) -> Self {
        Self { broker, builtins }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn builtins(&self) -> &BuiltinTools {
        &self.builtins
    }

    /// Route a call and fold any failure into an `isError` result.
    ///
    /// Routing failures get an `Error: ` prefix; error content a provider
    /// returned itself passes through untouched.
    pub async fn route(&self, name: &str, arguments: JsonObject) -> ToolOutput {
        let client = split_namespaced(name).map(|(id, _)| id);
        self.broker.note_tool_call(name, client.as_ref());

        match self.resolve(name, arguments).await {
            Ok(output) => {
                if output.is_error {
                    self.broker
                        .note_tool_result(name, client.as_ref(), Some(&output.summary()));
                } else {
                    self.broker.note_tool_result(name, client.as_ref(), None);
                }
                output
            }
            Err(err) => {
                let message = err.to_string();
                tracing::debug!(tool = name, "routing failed: {message}");
                self.broker
                    .note_tool_result(name, client.as_ref(), Some(&message));
                ToolOutput::error_text(format!("Error: {message}"))
            }
        }
    }

    async fn resolve(&self, name: &str, arguments: JsonObject) -> Result<ToolOutput, RouteError> {
        if let Some(handler) = self.builtins.get(name) {
            return handler.execute(arguments).await;
        }
        if let Some((provider, tool)) = split_namespaced(name) {
            return self
                .broker
                .dispatch_tool(&provider, tool.as_str(), arguments)
                .await;
        }
        Err(RouteError::UnknownTool(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::registry::{SessionCommand, SessionHandle};
    use crate::config::BrokerConfig;
    use crate::session::protocol::{BrokerFrame, ToolDescriptor};
    use crate::tools::standard_builtins;
    use tokio::sync::mpsc;

    fn test_router() -> ToolRouter {
        let broker = Arc::new(Broker::new(BrokerConfig::default()).unwrap());
        let builtins = standard_builtins(broker.clone());
        ToolRouter::new(broker, builtins)
    }

    #[tokio::test]
    async fn unknown_plain_name_yields_unknown_tool_error() {
        let router = test_router();
        let output = router.route("nope", JsonObject::new()).await;
        assert!(output.is_error);
        assert_eq!(output.summary(), "Error: Unknown tool: nope");
    }

    #[tokio::test]
    async fn unregistered_provider_yields_not_connected_error() {
        let router = test_router();
        let output = router.route("ghost__x", JsonObject::new()).await;
        assert!(output.is_error);
        assert_eq!(
            output.content[0],
            json!({"type": "text", "text": "Error: Broker client \"ghost\" not connected"})
        );
        let stats = router.broker().stats();
        assert_eq!(stats.tool_calls, 1);
        assert_eq!(stats.tool_errors, 1);
    }

    #[tokio::test]
    async fn builtin_names_resolve_before_namespacing() {
        let router = test_router();
        let output = router.route("list_broker_clients", JsonObject::new()).await;
        assert!(!output.is_error);
        assert_eq!(output.summary(), "[]");
    }

    #[tokio::test]
    async fn namespaced_call_round_trips_to_the_provider() {
        let router = test_router();
        let broker = router.broker().clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = broker.register(
            Some("hello-world"),
            vec![ToolDescriptor {
                name: "greet".to_string(),
                description: String::new(),
                input_schema: json!({"type": "object", "properties": {}}),
            }],
            SessionHandle::new(1, tx),
        );
        assert_eq!(id.as_str(), "hello-world");

        let responder = {
            let broker = broker.clone();
            tokio::spawn(async move {
                // Skip queued frames until the tool call arrives.
                while let Some(command) = rx.recv().await {
                    if let SessionCommand::Frame(BrokerFrame::ToolCall {
                        call_id,
                        tool,
                        arguments,
                    }) = command
                    {
                        assert_eq!(tool, "greet");
                        let name = arguments
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("nobody")
                            .to_string();
                        broker.calls().complete(
                            call_id.as_str(),
                            ToolOutput::text(format!("Hello, {name}!")),
                        );
                        break;
                    }
                }
            })
        };

        let mut arguments = JsonObject::new();
        arguments.insert("name".to_string(), json!("World"));
        let output = router.route("hello-world__greet", arguments).await;
        assert!(!output.is_error);
        assert_eq!(
            output.content,
            vec![json!({"type": "text", "text": "Hello, World!"})]
        );
        responder.await.unwrap();

        let stats = router.broker().stats();
        assert_eq!(stats.tool_calls, 1);
        assert_eq!(stats.tool_errors, 0);
    }

    #[tokio::test]
    async fn provider_error_results_pass_through_unprefixed() {
        let router = test_router();
        let broker = router.broker().clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        broker.register(Some("svc"), vec![], SessionHandle::new(1, tx));

        let responder = {
            let broker = broker.clone();
            tokio::spawn(async move {
                while let Some(command) = rx.recv().await {
                    if let SessionCommand::Frame(BrokerFrame::ToolCall { call_id, .. }) = command
                    {
                        broker
                            .calls()
                            .complete(call_id.as_str(), ToolOutput::error_text("disk full"));
                        break;
                    }
                }
            })
        };

        let output = router.route("svc__write", JsonObject::new()).await;
        assert!(output.is_error);
        assert_eq!(output.summary(), "disk full");
        responder.await.unwrap();

        let stats = router.broker().stats();
        assert_eq!(stats.tool_errors, 1);
    }
}

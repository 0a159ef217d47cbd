// Core modules
pub mod api;
pub mod broker;
mod chat;
mod config;
pub mod server;
pub mod session;

// NewType wrappers for strong typing
pub mod types;

// Built-in tools
mod tools;

// Re-export key types and functions
pub use api::AppState;
pub use broker::Broker;
pub use broker::activity::{ActivityEntry, ActivityKind, NotificationRecord, Stats};
pub use broker::correlator::{CorrelationError, Correlator};
pub use broker::events::{ClientStatus, ClientSummary, EventFrame, StateSnapshot};
pub use broker::router::{RouteError, ToolOutput, ToolRouter};
pub use chat::{ChatError, ChatProxy, build_prompt};
pub use config::BrokerConfig;
pub use server::{BrokerServer, serve_consumer_http};
pub use session::protocol::{BrokerFrame, ChatPayload, ProviderFrame, ToolDescriptor};
pub use session::serve_ws;
pub use tools::{BuiltinTools, ToolHandler, standard_builtins};
pub use types::{CallId, ProviderId, ToolName};

use anyhow::Result;

/// Convenience function to build a fully wired broker.
///
/// This creates the [`Broker`], registers the standard built-in tools, and
/// returns the [`AppState`] both listeners serve from.
pub fn create_broker(config: BrokerConfig) -> Result<AppState> {
    AppState::new(config)
}

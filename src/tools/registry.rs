//! Built-in tool handlers and their registry.
//!
//! Each built-in implements [`ToolHandler`]; the registry keeps them in
//! declaration order, which is the order consumers see them in `tools/list`
//! (built-ins always precede provider tools there).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::JsonObject;

use crate::broker::router::{RouteError, ToolOutput};

/// Trait for broker-implemented tools.
pub trait ToolHandler: Send + Sync {
    /// The tool's name (e.g., "list_broker_clients").
    fn name(&self) -> &'static str;

    /// The tool's description shown to consumers.
    fn description(&self) -> &'static str;

    /// The input schema for this tool.
    fn input_schema(&self) -> JsonObject;

    /// Executes the tool with the given arguments.
    fn execute(
        &self,
        args: JsonObject,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, RouteError>> + Send + '_>>;
}

/// Ordered registry of built-in tools.
#[derive(Clone, Default)]
pub struct BuiltinTools {
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl BuiltinTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Declaration order is list order.
    pub fn register<T: ToolHandler + 'static>(mut self, handler: T) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Get a handler by exact name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.iter().find(|h| h.name() == name).cloned()
    }

    /// All handlers in declaration order.
    pub fn handlers(&self) -> &[Arc<dyn ToolHandler>] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

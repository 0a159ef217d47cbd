//! Handler for the `list_broker_clients` tool.

use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::JsonObject;
use serde_json::json;

use crate::broker::Broker;
use crate::broker::router::{RouteError, ToolOutput};
use crate::tools::{ToolHandler, schema_object};

/// Lists every connected provider and the names of its published tools.
pub struct ListBrokerClients {
    broker: Arc<Broker>,
}

impl ListBrokerClients {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl ToolHandler for ListBrokerClients {
    fn name(&self) -> &'static str {
        "list_broker_clients"
    }

    fn description(&self) -> &'static str {
        "List all connected broker clients and the tools they publish."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(json!({}), &[])
    }

    fn execute(
        &self,
        _args: JsonObject,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ToolOutput, RouteError>> + Send + '_>>
    {
        let broker = self.broker.clone();
        Box::pin(async move {
            let clients: Vec<_> = broker
                .snapshot()
                .clients
                .iter()
                .map(|c| {
                    json!({
                        "clientId": c.client_id.as_str(),
                        "tools": c.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            let text = serde_json::to_string(&clients)
                .map_err(|e| RouteError::Internal(e.to_string()))?;
            Ok(ToolOutput::text(text))
        })
    }
}

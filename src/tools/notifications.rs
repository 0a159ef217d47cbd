//! Handler for the `get_notifications` tool.

use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::JsonObject;
use serde_json::json;

use crate::broker::Broker;
use crate::broker::router::{RouteError, ToolOutput};
use crate::tools::{ToolHandler, schema_object};
use crate::types::ProviderId;

const DEFAULT_LIMIT: usize = 50;

/// Returns recent notifications, per-provider or global.
pub struct GetNotifications {
    broker: Arc<Broker>,
}

impl GetNotifications {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl ToolHandler for GetNotifications {
    fn name(&self) -> &'static str {
        "get_notifications"
    }

    fn description(&self) -> &'static str {
        "Get recent notifications, optionally filtered to one broker client."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(
            json!({
                "clientId": {
                    "type": "string",
                    "description": "Restrict to this client's notifications."
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum entries to return (default 50)."
                }
            }),
            &[],
        )
    }

    fn execute(
        &self,
        args: JsonObject,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ToolOutput, RouteError>> + Send + '_>>
    {
        let broker = self.broker.clone();
        Box::pin(async move {
            let client = args
                .get("clientId")
                .and_then(|v| v.as_str())
                .map(ProviderId::new);
            let limit = args
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_LIMIT);

            let records = broker.recent_notifications(client.as_ref(), limit);
            let text = serde_json::to_string(&records)
                .map_err(|e| RouteError::Internal(e.to_string()))?;
            Ok(ToolOutput::text(text))
        })
    }
}

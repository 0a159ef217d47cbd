//! Handler for the `ask_ai` tool.

use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::JsonObject;
use serde_json::json;

use crate::broker::Broker;
use crate::broker::router::{RouteError, ToolOutput};
use crate::tools::speak::speak_text;
use crate::tools::{ToolHandler, schema_object};

/// Asks the upstream model a question and optionally speaks the answer.
pub struct AskAi {
    broker: Arc<Broker>,
}

impl AskAi {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl ToolHandler for AskAi {
    fn name(&self) -> &'static str {
        "ask_ai"
    }

    fn description(&self) -> &'static str {
        "Ask the configured AI model a question and return its answer."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(
            json!({
                "prompt": {"type": "string", "description": "The question to ask."},
                "system": {"type": "string", "description": "Optional system prompt."},
                "model": {"type": "string", "description": "Model override."},
                "speak": {
                    "type": "boolean",
                    "description": "Also speak the answer via kokoro-tts."
                }
            }),
            &["prompt"],
        )
    }

    fn execute(
        &self,
        args: JsonObject,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ToolOutput, RouteError>> + Send + '_>>
    {
        let broker = self.broker.clone();
        Box::pin(async move {
            let Some(prompt) = args.get("prompt").and_then(|v| v.as_str()) else {
                return Err(RouteError::InvalidArguments(
                    "ask_ai requires a `prompt` string".to_string(),
                ));
            };
            let system = args.get("system").and_then(|v| v.as_str());
            let model = args.get("model").and_then(|v| v.as_str());
            let speak = args
                .get("speak")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let (text, _model) = broker
                .generate("ask_ai", prompt, system, model)
                .await
                .map_err(RouteError::Upstream)?;

            if speak {
                let mut speak_args = JsonObject::new();
                speak_args.insert("text".to_string(), json!(text.clone()));
                if let Err(err) = speak_text(&broker, speak_args).await {
                    tracing::warn!("ask_ai speech failed: {err}");
                }
            }

            Ok(ToolOutput::text(text))
        })
    }
}

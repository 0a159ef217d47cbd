//! Handlers for the `speak` and `speak_action` tools.
//!
//! Both delegate the actual audio to the `kokoro-tts` provider's `speak`
//! tool; `speak_action` first rephrases the action text through the chat
//! proxy.

use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::JsonObject;
use serde_json::json;

use crate::broker::Broker;
use crate::broker::router::{RouteError, ToolOutput};
use crate::tools::{ToolHandler, schema_object};
use crate::types::ProviderId;

/// Provider id expected to publish the `speak` tool.
pub const TTS_PROVIDER: &str = "kokoro-tts";
/// Local tool name on the TTS provider.
pub const TTS_TOOL: &str = "speak";

const SPEAK_ACTION_SYSTEM: &str = "You announce what an assistant is about to do. \
Rephrase the given action as one short, natural spoken sentence in first person. \
Reply with only that sentence.";

/// Dispatch text to the TTS provider.
pub async fn speak_text(broker: &Broker, args: JsonObject) -> Result<ToolOutput, RouteError> {
    broker
        .dispatch_tool(&ProviderId::new(TTS_PROVIDER), TTS_TOOL, args)
        .await
}

/// Rephrase an action through the chat proxy (falling back to the raw text)
/// and speak the result.
pub async fn speak_action(broker: &Broker, action: &str) -> Result<ToolOutput, RouteError> {
    let phrase = match broker
        .generate("speak_action", action, Some(SPEAK_ACTION_SYSTEM), None)
        .await
    {
        Ok((text, _model)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                action.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(err) => {
            tracing::warn!("speak_action rephrasing failed, using raw action: {err}");
            action.to_string()
        }
    };

    let mut args = JsonObject::new();
    args.insert("text".to_string(), json!(phrase));
    speak_text(broker, args).await
}

/// Speaks the given text via the TTS provider.
pub struct Speak {
    broker: Arc<Broker>,
}

impl Speak {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl ToolHandler for Speak {
    fn name(&self) -> &'static str {
        "speak"
    }

    fn description(&self) -> &'static str {
        "Speak text aloud via the kokoro-tts client."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(
            json!({
                "text": {"type": "string", "description": "Text to speak."},
                "voice": {"type": "string", "description": "Voice to use."},
                "speed": {"type": "number", "description": "Playback speed."}
            }),
            &["text"],
        )
    }

    fn execute(
        &self,
        args: JsonObject,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ToolOutput, RouteError>> + Send + '_>>
    {
        let broker = self.broker.clone();
        Box::pin(async move {
            if !args.get("text").is_some_and(|v| v.is_string()) {
                return Err(RouteError::InvalidArguments(
                    "speak requires a `text` string".to_string(),
                ));
            }
            speak_text(&broker, args).await
        })
    }
}

/// Rephrases an action into a spoken announcement and speaks it.
pub struct SpeakAction {
    broker: Arc<Broker>,
}

impl SpeakAction {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl ToolHandler for SpeakAction {
    fn name(&self) -> &'static str {
        "speak_action"
    }

    fn description(&self) -> &'static str {
        "Rephrase an action as a short announcement and speak it aloud."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(
            json!({
                "action": {
                    "type": "string",
                    "description": "What is about to happen, in plain words."
                }
            }),
            &["action"],
        )
    }

    fn execute(
        &self,
        args: JsonObject,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ToolOutput, RouteError>> + Send + '_>>
    {
        let broker = self.broker.clone();
        Box::pin(async move {
            let Some(action) = args.get("action").and_then(|v| v.as_str()) else {
                return Err(RouteError::InvalidArguments(
                    "speak_action requires an `action` string".to_string(),
                ));
            };
            speak_action(&broker, action).await
        })
    }
}

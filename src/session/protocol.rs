//! Framed JSON message set for the provider channel.
//!
//! Every frame is a single JSON object with a `type` tag. Inbound and
//! outbound directions use separate enums so the broker can never emit a
//! provider-only frame or vice versa.

use chrono::{DateTime, Utc};
use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{CallId, ProviderId};

/// A tool published by a provider in its `register` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// One message of a provider chat payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Payload of a `chat_request` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Payload of a `chat_response` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: ChatMessage,
    pub model: String,
}

/// Frames the broker accepts from a provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProviderFrame {
    Register {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        tools: Vec<ToolDescriptor>,
    },
    Unregister,
    ToolResult {
        call_id: String,
        #[serde(default)]
        content: Option<Vec<Value>>,
        #[serde(default)]
        is_error: bool,
    },
    ChatRequest {
        request_id: String,
        #[serde(default)]
        payload: ChatPayload,
    },
    Notification {
        event: Value,
    },
    CallTool {
        #[serde(default)]
        call_id: Option<String>,
        tool: String,
        #[serde(default)]
        arguments: JsonObject,
    },
}

/// Frames the broker sends to a provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BrokerFrame {
    Registered {
        client_id: ProviderId,
    },
    ToolCall {
        call_id: CallId,
        tool: String,
        arguments: JsonObject,
    },
    ChatResponse {
        request_id: String,
        payload: ChatReply,
    },
    ChatError {
        request_id: String,
        error: String,
    },
    NotificationAck {
        timestamp: DateTime<Utc>,
    },
    CallToolResult {
        call_id: String,
        content: Vec<Value>,
        is_error: bool,
    },
    Error {
        message: String,
    },
}

/// The substitute content for a `tool_result` frame that carried none.
pub fn no_content_placeholder() -> Vec<Value> {
    vec![json!({"type": "text", "text": "No content returned"})]
}

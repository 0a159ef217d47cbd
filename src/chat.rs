//! Upstream generative-model proxy.
//!
//! Converts chat payloads into `POST /api/generate` calls against the
//! configured base URL, in both blocking and streaming (newline-delimited
//! JSON) form. The proxy itself is stateless; counters and activity live on
//! the [`Broker`](crate::broker::Broker).

use std::fmt;

use anyhow::Result;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::config::BrokerConfig;
use crate::session::protocol::{ChatMessage, ChatPayload, ChatReply};

/// Outcome stored in the chat correlator keyspace.
pub type ChatOutcome = std::result::Result<ChatReply, String>;

/// Boxed stream of generated tokens.
pub type TokenStream =
    std::pin::Pin<Box<dyn Stream<Item = std::result::Result<String, ChatError>> + Send>>;

/// Why an upstream call failed.
#[derive(Debug)]
pub enum ChatError {
    /// Upstream answered with a non-2xx status.
    Upstream { status: StatusCode, body: String },
    /// The request never completed (connect error, timeout, bad payload).
    Transport(reqwest::Error),
    /// A 2xx response without the expected `response` field.
    MissingResponse,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream { status, body } => {
                if body.is_empty() {
                    write!(f, "upstream returned {status}")
                } else {
                    write!(f, "upstream returned {status}: {body}")
                }
            }
            Self::Transport(err) if err.is_timeout() => {
                write!(f, "upstream request timed out")
            }
            Self::Transport(err) => write!(f, "upstream request failed: {err}"),
            Self::MissingResponse => write!(f, "upstream response missing `response` field"),
        }
    }
}

impl std::error::Error for ChatError {}

/// Client for the upstream `/api/generate` endpoint.
#[derive(Clone)]
pub struct ChatProxy {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl ChatProxy {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.chat_deadline)
            .build()?;
        Ok(Self {
            http,
            base_url: config.ollama_api_url.trim_end_matches('/').to_string(),
            default_model: config.ollama_model.clone(),
        })
    }

    /// The model to use for a request, falling back to the configured
    /// default when none (or an empty string) was asked for.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn request_body(&self, prompt: &str, system: Option<&str>, model: &str, stream: bool) -> Value {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), json!(model));
        body.insert("prompt".to_string(), json!(prompt));
        if let Some(system) = system {
            body.insert("system".to_string(), json!(system));
        }
        body.insert("stream".to_string(), json!(stream));
        Value::Object(body)
    }

    /// One-shot generation. Returns the `response` text of the upstream
    /// reply.
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        model: Option<&str>,
    ) -> std::result::Result<String, ChatError> {
        let model = self.resolve_model(model);
        let body = self.request_body(prompt, system, &model, false);

        let response = self
            .http
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(ChatError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                status,
                body: truncate(&body),
            });
        }

        let value: Value = response.json().await.map_err(ChatError::Transport)?;
        value
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ChatError::MissingResponse)
    }

    /// Streaming generation. Yields one item per `response` chunk of the
    /// upstream NDJSON stream; the stream ends at the upstream `done` marker.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
        model: Option<&str>,
    ) -> std::result::Result<TokenStream, ChatError> {
        let model = self.resolve_model(model);
        let body = self.request_body(prompt, system, &model, true);

        let response = self
            .http
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(ChatError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                status,
                body: truncate(&body),
            });
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(ChatError::Transport(err));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(line) else {
                        tracing::debug!("skipping malformed upstream chunk");
                        continue;
                    };
                    if let Some(token) = value.get("response").and_then(Value::as_str) {
                        if !token.is_empty() {
                            yield Ok(token.to_string());
                        }
                    }
                    if value.get("done").and_then(Value::as_bool).unwrap_or(false) {
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// Proxy a full provider chat payload and shape the reply frame payload.
    pub async fn chat(&self, payload: &ChatPayload) -> std::result::Result<ChatReply, ChatError> {
        let (prompt, system) = build_prompt(payload);
        let model = self.resolve_model(payload.model.as_deref());
        let text = self
            .generate(&prompt, system.as_deref(), Some(&model))
            .await?;
        Ok(ChatReply {
            message: ChatMessage {
                role: "assistant".to_string(),
                content: text,
            },
            model,
        })
    }
}

/// Assemble the upstream prompt and system text from a chat payload.
///
/// Non-system message contents are joined with newlines, an explicit
/// `prompt` field is appended last, and the first system message (if any)
/// becomes the upstream `system` field.
pub fn build_prompt(payload: &ChatPayload) -> (String, Option<String>) {
    let mut parts: Vec<&str> = payload
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| m.content.as_str())
        .collect();
    if let Some(prompt) = payload.prompt.as_deref() {
        if !prompt.is_empty() {
            parts.push(prompt);
        }
    }
    let system = payload
        .messages
        .iter()
        .find(|m| m.role == "system")
        .map(|m| m.content.clone());
    (parts.join("\n"), system)
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

//! Broker configuration.
//!
//! Everything is read from the environment with sensible defaults; CLI flags
//! on the binary override individual fields.

use std::env;
use std::time::Duration;

/// Default port for the provider WebSocket channel.
pub const DEFAULT_WS_PORT: u16 = 3099;
/// Default port for the consumer/dashboard HTTP surface.
pub const DEFAULT_HTTP_PORT: u16 = 3098;
/// Default upstream generative-model base URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Default model for chat proxying and `ask_ai`.
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:14b";

/// Deadline for a dispatched provider tool call.
pub const TOOL_CALL_DEADLINE: Duration = Duration::from_secs(300);
/// Deadline for an upstream chat request.
pub const CHAT_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Port the provider WebSocket listener binds to.
    pub ws_port: u16,
    /// Port the consumer/dashboard HTTP listener binds to.
    pub http_port: u16,
    /// Base URL of the upstream generative-model endpoint.
    pub ollama_api_url: String,
    /// Model used when a chat payload does not name one.
    pub ollama_model: String,
    /// Deadline for dispatched tool calls.
    pub tool_call_deadline: Duration,
    /// Deadline for upstream chat requests.
    pub chat_deadline: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ws_port: DEFAULT_WS_PORT,
            http_port: DEFAULT_HTTP_PORT,
            ollama_api_url: DEFAULT_OLLAMA_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            tool_call_deadline: TOOL_CALL_DEADLINE,
            chat_deadline: CHAT_DEADLINE,
        }
    }
}

impl BrokerConfig {
    /// Load the configuration from the environment.
    ///
    /// Unset variables fall back to their defaults; unparseable ports are
    /// logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = read_port("BROKER_WS_PORT") {
            config.ws_port = port;
        }
        if let Some(port) = read_port("MCP_HTTP_PORT") {
            config.http_port = port;
        }
        if let Ok(url) = env::var("OLLAMA_API_URL") {
            if !url.is_empty() {
                config.ollama_api_url = url;
            }
        }
        if let Ok(model) = env::var("OLLAMA_MODEL") {
            if !model.is_empty() {
                config.ollama_model = model;
            }
        }

        config
    }
}

fn read_port(name: &str) -> Option<u16> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BrokerConfig::default();
        assert_eq!(config.ws_port, 3099);
        assert_eq!(config.http_port, 3098);
        assert_eq!(config.ollama_api_url, "http://localhost:11434");
        assert_eq!(config.ollama_model, "qwen2.5:14b");
        assert_eq!(config.tool_call_deadline, Duration::from_secs(300));
        assert_eq!(config.chat_deadline, Duration::from_secs(120));
    }

    // Single test for all env handling: parallel tests sharing these
    // variables would race.
    #[test]
    fn environment_overrides_are_applied() {
        unsafe {
            env::set_var("BROKER_WS_PORT", "4001");
            env::set_var("MCP_HTTP_PORT", "4002");
            env::set_var("OLLAMA_API_URL", "http://ollama.internal:11434");
            env::set_var("OLLAMA_MODEL", "llama3");
        }

        let config = BrokerConfig::from_env();
        assert_eq!(config.ws_port, 4001);
        assert_eq!(config.http_port, 4002);
        assert_eq!(config.ollama_api_url, "http://ollama.internal:11434");
        assert_eq!(config.ollama_model, "llama3");

        unsafe {
            env::set_var("BROKER_WS_PORT", "not-a-port");
        }
        let config = BrokerConfig::from_env();
        assert_eq!(config.ws_port, DEFAULT_WS_PORT);

        unsafe {
            env::remove_var("BROKER_WS_PORT");
            env::remove_var("MCP_HTTP_PORT");
            env::remove_var("OLLAMA_API_URL");
            env::remove_var("OLLAMA_MODEL");
        }
    }
}

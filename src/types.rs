//! NewType wrappers for strong typing throughout the broker.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a call correlation id where a provider id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Identifier of a connected provider.
    ///
    /// Provider ids are sanitized at registration: every character outside
    /// `[A-Za-z0-9_-]` is replaced with `_`, and an id that is empty after
    /// sanitization is replaced with a random `rc_<8 hex>` id. All registry
    /// lookups and namespaced tool names use the sanitized form.
    ProviderId
);

newtype_string!(
    /// Provider-local tool name as published in a `register` frame.
    ///
    /// Distinct from the namespaced `<provider>__<tool>` form that consumers
    /// see; the broker always addresses the provider with the local name.
    ToolName
);

newtype_string!(
    /// Correlation id for an in-flight tool call (16 lowercase hex chars).
    CallId
);

impl ProviderId {
    /// Sanitize a requested provider id.
    ///
    /// Returns `None` when nothing usable remains, in which case the caller
    /// assigns a [`ProviderId::random`] id instead.
    pub fn sanitize(requested: &str) -> Option<Self> {
        let cleaned: String = requested
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(Self(cleaned))
        }
    }

    /// Generate a fallback id of the form `rc_<8 hex>`.
    pub fn random() -> Self {
        Self(format!("rc_{:08x}", rand::random::<u32>()))
    }
}

impl CallId {
    /// Generate a fresh random correlation id.
    pub fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }
}

/// Join a provider id and a local tool name into the consumer-visible form.
pub fn namespaced_name(provider: &ProviderId, tool: &str) -> String {
    format!("{}__{}", provider, tool)
}

/// Split a consumer-visible tool name at the first `__` separator.
///
/// Returns `None` for names without a separator (built-ins and plain names).
pub fn split_namespaced(name: &str) -> Option<(ProviderId, ToolName)> {
    let (provider, tool) = name.split_once("__")?;
    Some((ProviderId::new(provider), ToolName::new(tool)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        let id = ProviderId::sanitize("héllo world!").unwrap();
        assert_eq!(id.as_str(), "h_llo_world_");
    }

    #[test]
    fn sanitize_keeps_valid_ids_untouched() {
        let id = ProviderId::sanitize("kokoro-tts_2").unwrap();
        assert_eq!(id.as_str(), "kokoro-tts_2");
    }

    #[test]
    fn sanitize_rejects_empty_input() {
        assert!(ProviderId::sanitize("").is_none());
    }

    #[test]
    fn random_id_has_expected_shape() {
        let id = ProviderId::random();
        let hex = id.as_str().strip_prefix("rc_").unwrap();
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn call_id_is_sixteen_hex_chars() {
        let id = CallId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn namespaced_names_split_at_first_separator() {
        let (provider, tool) = split_namespaced("hello-world__greet").unwrap();
        assert_eq!(provider.as_str(), "hello-world");
        assert_eq!(tool.as_str(), "greet");

        // Tool names may themselves contain the separator; only the first
        // occurrence splits.
        let (provider, tool) = split_namespaced("svc__a__b").unwrap();
        assert_eq!(provider.as_str(), "svc");
        assert_eq!(tool.as_str(), "a__b");
    }

    #[test]
    fn plain_names_are_not_namespaced() {
        assert!(split_namespaced("list_broker_clients").is_none());
    }

    #[test]
    fn round_trip_namespacing() {
        let provider = ProviderId::new("clock");
        let name = namespaced_name(&provider, "now");
        let (back, tool) = split_namespaced(&name).unwrap();
        assert_eq!(back, provider);
        assert_eq!(tool.as_str(), "now");
    }
}

//! Built-in broker tools.
//!
//! These are always present and precede provider tools in list output.
//! Registration order here is the order consumers see.

mod registry;

pub use registry::{BuiltinTools, ToolHandler};

mod ask_ai;
mod list_clients;
mod notifications;
pub mod speak;

pub use ask_ai::AskAi;
pub use list_clients::ListBrokerClients;
pub use notifications::GetNotifications;
pub use speak::{Speak, SpeakAction};

use std::sync::Arc;

use rmcp::model::JsonObject;
use serde_json::{Value, json};

use crate::broker::Broker;

/// The standard built-in set in its fixed declaration order.
pub fn standard_builtins(broker: Arc<Broker>) -> BuiltinTools {
    BuiltinTools::new()
        .register(ListBrokerClients::new(broker.clone()))
        .register(GetNotifications::new(broker.clone()))
        .register(Speak::new(broker.clone()))
        .register(SpeakAction::new(broker.clone()))
        .register(AskAi::new(broker))
}

/// Build an object input schema from a `properties` map.
pub(crate) fn schema_object(properties: Value, required: &[&str]) -> JsonObject {
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), properties);
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;

    #[test]
    fn builtins_are_registered_in_declaration_order() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()).unwrap());
        let builtins = standard_builtins(broker);
        let names: Vec<_> = builtins.handlers().iter().map(|h| h.name()).collect();
        assert_eq!(
            names,
            [
                "list_broker_clients",
                "get_notifications",
                "speak",
                "speak_action",
                "ask_ai"
            ]
        );
    }

    #[test]
    fn lookup_is_by_exact_name() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()).unwrap());
        let builtins = standard_builtins(broker);
        assert!(builtins.get("speak").is_some());
        assert!(builtins.get("Speak").is_none());
        assert!(builtins.get("speak ").is_none());
    }

    #[test]
    fn schema_object_includes_required_only_when_present() {
        let schema = schema_object(json!({"text": {"type": "string"}}), &["text"]);
        assert_eq!(schema.get("required"), Some(&json!(["text"])));

        let schema = schema_object(json!({}), &[]);
        assert!(!schema.contains_key("required"));
    }
}

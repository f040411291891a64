//! Routing classification.
//!
//! Precedence, first match wins:
//!
//! 1. Provider address invalid -> dead-letter, no routing key.
//! 2. Fast-path requested (`fastline=true` flag or upstream override)
//!    -> fast-path, payload validity not checked.
//! 3. Payload not a JSON object or array -> dead-letter, routing key kept.
//! 4. Otherwise -> main.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{ProviderAddress, RoutingKey};

/// Logical delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Main,
    FastPath,
    DeadLetter,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Main, Channel::FastPath, Channel::DeadLetter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Main => "main",
            Channel::FastPath => "fast_path",
            Channel::DeadLetter => "dead_letter",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub channel: Channel,
    pub routing_key: Option<RoutingKey>,
    /// False for every dead-lettered message. Fast-path messages are
    /// marked valid: their payload is not inspected here.
    pub valid: bool,
}

/// Classify a message.
///
/// `address` is `None` when the provider string failed to parse.
/// `fastline_override` is a fast-path request from an upstream stage.
pub fn classify(
    address: Option<&ProviderAddress>,
    payload: &str,
    fastline_override: bool,
) -> RoutingDecision {
    let Some(address) = address else {
        return RoutingDecision {
            channel: Channel::DeadLetter,
            routing_key: None,
            valid: false,
        };
    };

    let routing_key = address.routing_key();
    debug!(routing_key = %routing_key, "routing to routing key");

    if fastline_override || address.is_fastline() {
        debug!(routing_key = %routing_key, "is fastline");
        return RoutingDecision {
            channel: Channel::FastPath,
            routing_key: Some(routing_key),
            valid: true,
        };
    }

    if is_structured_payload(payload) {
        RoutingDecision {
            channel: Channel::Main,
            routing_key: Some(routing_key),
            valid: true,
        }
    } else {
        RoutingDecision {
            channel: Channel::DeadLetter,
            routing_key: Some(routing_key),
            valid: false,
        }
    }
}

/// Whether the payload is a JSON object or array.
///
/// Scalars (`"text"`, `42`, `null`) are well-formed JSON but not
/// structured data.
pub fn is_structured_payload(payload: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => value.is_object() || value.is_array(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> ProviderAddress {
        ProviderAddress::parse(s).unwrap()
    }

    #[test]
    fn test_invalid_address_dead_letters_without_key() {
        let decision = classify(None, r#"{"a":1}"#, true);
        assert_eq!(decision.channel, Channel::DeadLetter);
        assert_eq!(decision.routing_key, None);
        assert!(!decision.valid);
    }

    #[test]
    fn test_fastline_flag() {
        let a = addr("mobility/tourism?fastline=true");
        let decision = classify(Some(&a), r#"{"a":1}"#, false);
        assert_eq!(decision.channel, Channel::FastPath);
        assert_eq!(decision.routing_key.unwrap().as_str(), "mobility.tourism");
    }

    #[test]
    fn test_fastline_ignores_payload_validity() {
        let a = addr("mobility/tourism?fastline=true");
        let decision = classify(Some(&a), "not-json", false);
        assert_eq!(decision.channel, Channel::FastPath);
    }

    #[test]
    fn test_fastline_override() {
        let a = addr("parking/bolzano");
        let decision = classify(Some(&a), "not-json", true);
        assert_eq!(decision.channel, Channel::FastPath);
    }

    #[test]
    fn test_malformed_payload_keeps_routing_key() {
        let a = addr("parking/bolzano");
        let decision = classify(Some(&a), "not-json", false);
        assert_eq!(decision.channel, Channel::DeadLetter);
        assert_eq!(decision.routing_key.unwrap().as_str(), "parking.bolzano");
        assert!(!decision.valid);
    }

    #[test]
    fn test_main_channel() {
        let a = addr("parking/bolzano");
        let decision = classify(Some(&a), r#"[{"id":1}]"#, false);
        assert_eq!(decision.channel, Channel::Main);
        assert!(decision.valid);
    }

    #[test]
    fn test_structured_payload_detection() {
        assert!(is_structured_payload("{}"));
        assert!(is_structured_payload(" [1, 2] "));
        assert!(!is_structured_payload("42"));
        assert!(!is_structured_payload("\"text\""));
        assert!(!is_structured_payload("null"));
        assert!(!is_structured_payload("{\"a\":"));
        assert!(!is_structured_payload(""));
    }

    #[test]
    fn test_channel_labels() {
        assert_eq!(Channel::FastPath.as_str(), "fast_path");
        assert_eq!(
            serde_json::to_string(&Channel::DeadLetter).unwrap(),
            "\"dead_letter\""
        );
    }
}

//! Typed message context and delivery headers.
//!
//! Inbound transport headers are read once into a [`MessageContext`]; the
//! headers attached to the outgoing message are built fresh from the
//! routing decision as [`DeliveryHeaders`]. Nothing else from the inbound
//! header bag reaches the broker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::RoutingKey;
use crate::routing::{Channel, RoutingDecision};

/// Inbound header carrying a provider override.
pub const PROVIDER_HEADER: &str = "provider";

/// Outbound field names understood by channel consumers.
pub const ROUTING_KEY_FIELD: &str = "routing_key";
pub const VALID_FIELD: &str = "valid";
pub const FASTLINE_FIELD: &str = "fastline";

/// Everything the pipeline needs to know about one inbound message besides
/// its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    /// Provider from the inbound `provider` header.
    pub provider_override: Option<String>,
    /// Static provider configured for the route the message arrived on.
    pub route_provider: Option<String>,
    /// Fast-path requested by an upstream stage (route configuration),
    /// independent of the provider's query flags.
    pub fastline: bool,
    /// When the message was first received.
    pub received_at: DateTime<Utc>,
}

impl MessageContext {
    pub fn new(received_at: DateTime<Utc>) -> Self {
        Self {
            provider_override: None,
            route_provider: None,
            fastline: false,
            received_at,
        }
    }

    /// Read the recognized headers of an inbound message.
    ///
    /// Header names are matched case-insensitively; an empty provider
    /// header counts as absent.
    pub fn from_headers(headers: &HashMap<String, String>, received_at: DateTime<Utc>) -> Self {
        let provider_override = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(PROVIDER_HEADER))
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty());

        Self {
            provider_override,
            ..Self::new(received_at)
        }
    }

    pub fn with_route_provider(mut self, provider: Option<String>) -> Self {
        self.route_provider = provider;
        self
    }

    pub fn with_fastline(mut self, fastline: bool) -> Self {
        self.fastline = fastline;
        self
    }

    /// Effective provider string: the header wins over the route default.
    pub fn provider(&self) -> Option<&str> {
        self.provider_override
            .as_deref()
            .or(self.route_provider.as_deref())
    }
}

/// Headers set on the outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryHeaders {
    pub routing_key: Option<RoutingKey>,
    pub valid: bool,
    pub fastline: bool,
}

impl DeliveryHeaders {
    pub fn from_decision(decision: &RoutingDecision) -> Self {
        Self {
            routing_key: decision.routing_key.clone(),
            valid: decision.valid,
            fastline: decision.channel == Channel::FastPath,
        }
    }

    /// Field/value pairs for the broker. The routing key is omitted when
    /// the message is unroutable.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::with_capacity(3);
        if let Some(key) = &self.routing_key {
            fields.push((ROUTING_KEY_FIELD, key.to_string()));
        }
        fields.push((VALID_FIELD, self.valid.to_string()));
        fields.push((FASTLINE_FIELD, self.fastline.to_string()));
        fields
    }
}

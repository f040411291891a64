//! Single-message ingress pipeline.
//!
//! Envelope construction, address parsing and classification for one
//! inbound message. Stateless: safe to run on any number of workers.

use ingress_common::IngressResult;

use crate::context::{DeliveryHeaders, MessageContext};
use crate::envelope::{build_envelope, Envelope};
use crate::routing::{classify, RoutingDecision};

/// A message ready to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    pub decision: RoutingDecision,
    pub headers: DeliveryHeaders,
    pub envelope: Envelope,
    /// Serialized envelope.
    pub body: String,
}

/// Wrap and classify one inbound payload.
///
/// A message with no provider at all is treated like one whose provider
/// string is empty, and dead-lettered.
pub fn route_message(payload: &str, ctx: &MessageContext) -> IngressResult<RoutedMessage> {
    let provider = ctx.provider().unwrap_or("");
    let built = build_envelope(payload, provider, ctx.received_at);

    let decision = classify(built.address.as_ref().ok(), payload, ctx.fastline);
    let headers = DeliveryHeaders::from_decision(&decision);
    let body = built.envelope.to_json()?;

    Ok(RoutedMessage {
        decision,
        headers,
        envelope: built.envelope,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Channel;
    use chrono::{TimeZone, Utc};

    fn ctx(provider: Option<&str>) -> MessageContext {
        MessageContext::new(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap())
            .with_route_provider(provider.map(str::to_string))
    }

    #[test]
    fn test_missing_provider_dead_letters() {
        let routed = route_message(r#"{"a":1}"#, &ctx(None)).unwrap();
        assert_eq!(routed.decision.channel, Channel::DeadLetter);
        assert_eq!(routed.envelope.provider, "");
        assert_eq!(routed.headers.routing_key, None);
    }

    #[test]
    fn test_body_is_serialized_envelope() {
        let routed = route_message(r#"{"a":1}"#, &ctx(Some("parking/bolzano"))).unwrap();
        let parsed: Envelope = serde_json::from_str(&routed.body).unwrap();
        assert_eq!(parsed, routed.envelope);
        assert_eq!(routed.decision.channel, Channel::Main);
    }

    #[test]
    fn test_fastline_header_set_only_for_fast_path() {
        let routed = route_message("x", &ctx(Some("a/b?fastline=true"))).unwrap();
        assert!(routed.headers.fastline);
        assert!(routed.headers.valid);

        let routed = route_message("{}", &ctx(Some("a/b"))).unwrap();
        assert!(!routed.headers.fastline);
    }
}

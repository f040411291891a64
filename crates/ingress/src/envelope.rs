//! Envelope construction for inbound payloads.
//!
//! Every inbound payload is wrapped before it enters the pipeline:
//!
//! ```json
//! {"provider": "mobility/tourism", "timestamp": "2024-01-15T12:00:00.000Z", "rawdata": "..."}
//! ```
//!
//! `timestamp` is the instant the message was received, `provider` is the
//! normalized provider address (or the raw provider string when it could
//! not be parsed) and `rawdata` is the payload, untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use ingress_common::{format_instant, IngressError, IngressResult};

use crate::address::ProviderAddress;

/// Canonical wrapper placed around every raw inbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub provider: String,
    pub timestamp: String,
    pub rawdata: String,
}

impl Envelope {
    /// Serialize to the JSON body sent to the broker.
    pub fn to_json(&self) -> IngressResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result of building an envelope.
///
/// `address` is the side channel telling the classifier whether the
/// provider string parsed.
#[derive(Debug)]
pub struct BuiltEnvelope {
    pub envelope: Envelope,
    pub address: Result<ProviderAddress, IngressError>,
}

impl BuiltEnvelope {
    pub fn provider_valid(&self) -> bool {
        self.address.is_ok()
    }
}

/// Build an envelope for `payload` received from `provider` at `received_at`.
///
/// The receipt instant is passed in rather than read from the clock so a
/// redelivered message keeps the instant of its first processing.
pub fn build_envelope(payload: &str, provider: &str, received_at: DateTime<Utc>) -> BuiltEnvelope {
    let timestamp = format_instant(&received_at);

    match ProviderAddress::parse(provider) {
        Ok(address) => BuiltEnvelope {
            envelope: Envelope {
                provider: address.to_string(),
                timestamp,
                rawdata: payload.to_string(),
            },
            address: Ok(address),
        },
        Err(err) => {
            warn!(provider = %provider, error = %err, "invalid provider");
            BuiltEnvelope {
                envelope: Envelope {
                    provider: provider.to_string(),
                    timestamp,
                    rawdata: payload.to_string(),
                },
                address: Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_provider_is_normalized() {
        let built = build_envelope(r#"{"a":1}"#, "mobility/./tourism?fastline=true", received());
        assert!(built.provider_valid());
        assert_eq!(built.envelope.provider, "mobility/tourism?fastline=true");
        assert_eq!(built.envelope.timestamp, "2024-01-15T12:00:00.000Z");
        assert_eq!(built.envelope.rawdata, r#"{"a":1}"#);
    }

    #[test]
    fn test_invalid_provider_kept_verbatim() {
        let built = build_envelope("payload", "not a uri", received());
        assert!(!built.provider_valid());
        assert_eq!(built.envelope.provider, "not a uri");
        assert_eq!(built.envelope.rawdata, "payload");
        assert!(matches!(
            built.address,
            Err(IngressError::InvalidProviderAddress(_))
        ));
    }

    #[test]
    fn test_envelope_json_field_names() {
        let built = build_envelope("x", "a/b", received());
        let json = built.envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["provider"], "a/b");
        assert_eq!(value["timestamp"], "2024-01-15T12:00:00.000Z");
        assert_eq!(value["rawdata"], "x");
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_same_instant_same_timestamp() {
        let first = build_envelope("x", "a/b", received());
        let second = build_envelope("x", "a/b", received());
        assert_eq!(first.envelope, second.envelope);
    }
}

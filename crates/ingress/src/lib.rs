//! Ingress classification library.
//!
//! Wraps raw provider payloads into envelopes and decides which of three
//! delivery channels each one takes.
//!
//! # Architecture
//!
//! - [`address`] parses provider strings (`mobility/tourism?fastline=true`)
//!   and derives routing keys
//! - [`envelope`] builds the `{provider, timestamp, rawdata}` wrapper
//! - [`routing`] classifies into main, fast-path or dead-letter
//! - [`context`] carries the typed inbound context and outbound headers
//! - [`pipeline`] ties the above together for one message

pub mod address;
pub mod context;
pub mod envelope;
pub mod pipeline;
pub mod routing;

// Re-exports
pub use address::{ProviderAddress, RoutingKey, FASTLINE_FLAG};
pub use context::{DeliveryHeaders, MessageContext, PROVIDER_HEADER};
pub use envelope::{build_envelope, BuiltEnvelope, Envelope};
pub use pipeline::{route_message, RoutedMessage};
pub use routing::{classify, is_structured_payload, Channel, RoutingDecision};

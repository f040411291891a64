//! Common types and utilities shared across the ingress services.

pub mod config;
pub mod error;
pub mod time;

pub use config::expand_env_vars;
pub use error::{IngressError, IngressResult};
pub use time::{format_instant, parse_timestamp, TimeParseError};

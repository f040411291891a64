//! Ingress router service.
//!
//! Accepts raw provider payloads over HTTP, wraps them in envelopes,
//! classifies them and appends each one to the stream of its delivery
//! channel.

pub mod config;
pub mod config_loader;
pub mod server;

pub use config::{RouteConfig, RouterConfig};
pub use server::{build_router, start_server, ServerState};

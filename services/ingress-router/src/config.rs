//! Runtime configuration for the ingress router.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use storage::ChannelStreams;

/// Default maximum accepted payload size (10 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub redis_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Provider used when neither a header nor a route supplies one.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Named routes served at `POST /ingress/{name}`.
    #[serde(default)]
    pub routes: HashMap<String, RouteConfig>,
    #[serde(default)]
    pub streams: ChannelStreams,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

/// A named inbound route with its static provider string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub provider: String,
    /// Send everything on this route to the fast path.
    #[serde(default)]
    pub fastline: bool,
}

fn default_port() -> u16 {
    8080
}

fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://redis:6379".to_string(),
            port: default_port(),
            default_provider: None,
            routes: HashMap::new(),
            streams: ChannelStreams::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl RouterConfig {
    /// Build configuration from environment variables.
    ///
    /// `INGRESS_ROUTES` is a comma-separated list of `name=provider` pairs.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match env::var("INGRESS_PORT") {
            Ok(v) => v.parse().with_context(|| format!("Invalid INGRESS_PORT: {}", v))?,
            Err(_) => defaults.port,
        };

        let max_payload_bytes = match env::var("INGRESS_MAX_PAYLOAD_BYTES") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("Invalid INGRESS_MAX_PAYLOAD_BYTES: {}", v))?,
            Err(_) => defaults.max_payload_bytes,
        };

        let routes = match env::var("INGRESS_ROUTES") {
            Ok(v) => parse_routes(&v)?,
            Err(_) => HashMap::new(),
        };

        let streams = ChannelStreams {
            main: env::var("INGRESS_STREAM_MAIN").unwrap_or(defaults.streams.main),
            fast_path: env::var("INGRESS_STREAM_FASTLINE").unwrap_or(defaults.streams.fast_path),
            dead_letter: env::var("INGRESS_STREAM_DEADLETTER")
                .unwrap_or(defaults.streams.dead_letter),
        };

        Ok(Self {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            port,
            default_provider: env::var("INGRESS_DEFAULT_PROVIDER")
                .ok()
                .filter(|v| !v.is_empty()),
            routes,
            streams,
            max_payload_bytes,
        })
    }
}

/// Parse `name=provider,name2=provider2`.
pub fn parse_routes(value: &str) -> Result<HashMap<String, RouteConfig>> {
    let mut routes = HashMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, provider) = entry
            .split_once('=')
            .with_context(|| format!("Invalid route entry (expected name=provider): {}", entry))?;
        routes.insert(
            name.trim().to_string(),
            RouteConfig {
                provider: provider.trim().to_string(),
                fastline: false,
            },
        );
    }
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        let routes = parse_routes("bz=parking/bolzano, tourism=mobility/tourism?fastline=true").unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes["bz"].provider, "parking/bolzano");
        assert_eq!(routes["tourism"].provider, "mobility/tourism?fastline=true");
        assert!(!routes["tourism"].fastline);
    }

    #[test]
    fn test_parse_routes_rejects_bare_name() {
        assert!(parse_routes("bz").is_err());
    }

    #[test]
    fn test_parse_routes_empty() {
        assert!(parse_routes("").unwrap().is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.max_payload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.streams.dead_letter, "ingress:deadletter");
    }
}

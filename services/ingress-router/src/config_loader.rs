//! YAML configuration loader for the ingress router.
//!
//! Supports environment variable substitution using `${VAR}` and
//! `${VAR:-default}` syntax.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use ingress::ProviderAddress;
use ingress_common::expand_env_vars;

use crate::config::RouterConfig;

/// Load and validate a router config file.
pub fn load_router_config<P: AsRef<Path>>(path: P) -> Result<RouterConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read router config from {:?}", path.as_ref()))?;

    parse_router_config(&content)
        .with_context(|| format!("Invalid router config {:?}", path.as_ref()))
}

/// Parse and validate router config YAML.
pub fn parse_router_config(content: &str) -> Result<RouterConfig> {
    let expanded = expand_env_vars(content)?;

    let config: RouterConfig =
        serde_yaml::from_str(&expanded).with_context(|| "Failed to parse router config YAML")?;

    validate_router_config(&config)?;

    Ok(config)
}

fn validate_router_config(config: &RouterConfig) -> Result<()> {
    anyhow::ensure!(!config.redis_url.is_empty(), "redis_url cannot be empty");
    anyhow::ensure!(config.port > 0, "port must be greater than 0");
    anyhow::ensure!(
        config.max_payload_bytes > 0,
        "max_payload_bytes must be greater than 0"
    );

    for (name, stream) in [
        ("main", &config.streams.main),
        ("fast_path", &config.streams.fast_path),
        ("dead_letter", &config.streams.dead_letter),
    ] {
        anyhow::ensure!(!stream.is_empty(), "Stream name for {} cannot be empty", name);
    }

    // A misconfigured static provider would dead-letter every message on
    // its route.
    for (name, route) in &config.routes {
        anyhow::ensure!(!name.is_empty(), "Route name cannot be empty");
        ProviderAddress::parse(&route.provider)
            .with_context(|| format!("Route {} has an invalid provider", name))?;
    }
    if let Some(provider) = &config.default_provider {
        ProviderAddress::parse(provider).with_context(|| "Invalid default_provider")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
redis_url: ${ROUTER_TEST_REDIS_URL:-redis://localhost:6379}
port: 9090
default_provider: misc/unknown
routes:
  bolzano:
    provider: parking/bolzano
  tourism:
    provider: mobility/tourism
    fastline: true
streams:
  main: q:main
  fast_path: q:fast
  dead_letter: q:dead
"#;

    #[test]
    fn test_parse_full_config() {
        std::env::remove_var("ROUTER_TEST_REDIS_URL");
        let config = parse_router_config(CONFIG).unwrap();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.port, 9090);
        assert_eq!(config.default_provider.as_deref(), Some("misc/unknown"));
        assert!(config.routes["tourism"].fastline);
        assert_eq!(config.streams.fast_path, "q:fast");
        assert_eq!(config.max_payload_bytes, crate::config::DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_router_config("redis_url: redis://r:6379\n").unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.routes.is_empty());
        assert_eq!(config.streams.main, "ingress:main");
    }

    #[test]
    fn test_invalid_route_provider_rejected() {
        let yaml = "redis_url: redis://r\nroutes:\n  bad:\n    provider: \"not a uri\"\n";
        assert!(parse_router_config(yaml).is_err());
    }

    #[test]
    fn test_empty_stream_rejected() {
        let yaml = "redis_url: redis://r\nstreams:\n  main: \"\"\n  fast_path: f\n  dead_letter: d\n";
        assert!(parse_router_config(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "redis_url: redis://file:6379").unwrap();
        writeln!(file, "max_payload_bytes: 1024").unwrap();

        let config = load_router_config(file.path()).unwrap();
        assert_eq!(config.redis_url, "redis://file:6379");
        assert_eq!(config.max_payload_bytes, 1024);
    }

    #[test]
    fn test_missing_file() {
        assert!(load_router_config("/nonexistent/router.yaml").is_err());
    }
}

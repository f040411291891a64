//! YAML configuration loader for station sync.
//!
//! Supports environment variable substitution using `${VAR}` and
//! `${VAR:-default}` syntax.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use ingress_common::expand_env_vars;

use crate::config::SyncConfig;

/// Load and validate a station sync config file.
pub fn load_sync_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read station sync config from {:?}", path.as_ref()))?;

    parse_sync_config(&content)
        .with_context(|| format!("Invalid station sync config {:?}", path.as_ref()))
}

pub fn parse_sync_config(content: &str) -> Result<SyncConfig> {
    let expanded = expand_env_vars(content)?;

    let config: SyncConfig = serde_yaml::from_str(&expanded)
        .with_context(|| "Failed to parse station sync config YAML")?;

    validate_sync_config(&config)?;

    Ok(config)
}

pub fn validate_sync_config(config: &SyncConfig) -> Result<()> {
    anyhow::ensure!(!config.redis_url.is_empty(), "redis_url cannot be empty");
    anyhow::ensure!(!config.consumer_group.is_empty(), "consumer_group cannot be empty");
    anyhow::ensure!(!config.consumer_name.is_empty(), "consumer_name cannot be empty");
    anyhow::ensure!(
        !config.timeseries.base_url.is_empty(),
        "timeseries.base_url cannot be empty"
    );
    anyhow::ensure!(
        !config.timeseries.station_type.is_empty(),
        "timeseries.station_type cannot be empty"
    );
    anyhow::ensure!(!config.storage.bucket.is_empty(), "storage.bucket cannot be empty");

    anyhow::ensure!(!config.origins.is_empty(), "At least one origin must be configured");
    let mut seen = HashSet::new();
    for origin in &config.origins {
        anyhow::ensure!(!origin.id.is_empty(), "Origin id cannot be empty");
        anyhow::ensure!(seen.insert(&origin.id), "Duplicate origin: {}", origin.id);
        anyhow::ensure!(
            !origin.stream.is_empty(),
            "Origin {} has an empty stream name",
            origin.id
        );
        anyhow::ensure!(
            !origin.mapping.id_field.is_empty(),
            "Origin {} has an empty id_field",
            origin.id
        );
    }

    if let Some(metadata) = &config.metadata {
        anyhow::ensure!(!metadata.stream.is_empty(), "metadata.stream cannot be empty");
        anyhow::ensure!(
            !metadata.sheet_name.is_empty(),
            "metadata.sheet_name cannot be empty"
        );
        anyhow::ensure!(
            metadata.first_field_column >= 1,
            "metadata.first_field_column must be at least 1 (column 0 holds the station id)"
        );
    }

    Ok(())
}

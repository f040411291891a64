//! Runtime configuration for the station sync service.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

use station_cache::{DataType, DEFAULT_FIRST_FIELD_COLUMN};
use storage::{ObjectStorageConfig, TimeSeriesConfig};

use crate::mapping::FieldMapping;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub redis_url: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub storage: ObjectStorageConfig,
    pub timeseries: TimeSeriesConfig,
    pub origins: Vec<OriginConfig>,
    #[serde(default)]
    pub metadata: Option<MetadataConfig>,
}

/// One origin: where its payload references arrive and how to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginConfig {
    pub id: String,
    pub stream: String,
    pub mapping: FieldMapping,
    #[serde(default)]
    pub data_types: Vec<DataType>,
}

/// Enrichment workbook stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub stream: String,
    pub sheet_name: String,
    #[serde(default = "default_first_field_column")]
    pub first_field_column: usize,
}

fn default_consumer_group() -> String {
    "station-sync".to_string()
}

fn default_consumer_name() -> String {
    "station-sync-1".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_first_field_column() -> usize {
    DEFAULT_FIRST_FIELD_COLUMN
}

impl SyncConfig {
    /// Build configuration from environment variables.
    ///
    /// `STATION_SYNC_ORIGINS` lists `origin=stream` pairs. Origins built
    /// this way use a flat mapping: `id`, `name`, `latitude`, `longitude`.
    pub fn from_env() -> Result<Self> {
        let storage_defaults = ObjectStorageConfig::default();
        let storage = ObjectStorageConfig {
            endpoint: env::var("S3_ENDPOINT").unwrap_or(storage_defaults.endpoint),
            bucket: env::var("S3_BUCKET").unwrap_or(storage_defaults.bucket),
            access_key_id: env::var("S3_ACCESS_KEY").unwrap_or(storage_defaults.access_key_id),
            secret_access_key: env::var("S3_SECRET_KEY")
                .unwrap_or(storage_defaults.secret_access_key),
            region: env::var("S3_REGION").unwrap_or(storage_defaults.region),
            allow_http: env::var("S3_ALLOW_HTTP")
                .map(|v| v == "true")
                .unwrap_or(storage_defaults.allow_http),
        };

        let ts_defaults = TimeSeriesConfig::default();
        let timeseries = TimeSeriesConfig {
            base_url: env::var("TIMESERIES_URL").unwrap_or(ts_defaults.base_url),
            station_type: env::var("TIMESERIES_STATION_TYPE").unwrap_or(ts_defaults.station_type),
            provenance_name: env::var("PROVENANCE_NAME").unwrap_or(ts_defaults.provenance_name),
            provenance_version: env::var("PROVENANCE_VERSION")
                .unwrap_or(ts_defaults.provenance_version),
            timeout_secs: match env::var("TIMESERIES_TIMEOUT_SECS") {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("Invalid TIMESERIES_TIMEOUT_SECS: {}", v))?,
                Err(_) => ts_defaults.timeout_secs,
            },
        };

        let origins = match env::var("STATION_SYNC_ORIGINS") {
            Ok(v) => parse_origins(&v)?,
            Err(_) => Vec::new(),
        };

        let metadata = match env::var("METADATA_STREAM") {
            Ok(stream) if !stream.is_empty() => Some(MetadataConfig {
                stream,
                sheet_name: env::var("METADATA_SHEET").unwrap_or_else(|_| "Stations".to_string()),
                first_field_column: match env::var("METADATA_FIRST_FIELD_COLUMN") {
                    Ok(v) => v
                        .parse()
                        .with_context(|| format!("Invalid METADATA_FIRST_FIELD_COLUMN: {}", v))?,
                    Err(_) => DEFAULT_FIRST_FIELD_COLUMN,
                },
            }),
            _ => None,
        };

        Ok(Self {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379".to_string()),
            consumer_group: env::var("CONSUMER_GROUP").unwrap_or_else(|_| default_consumer_group()),
            consumer_name: env::var("CONSUMER_NAME").unwrap_or_else(|_| default_consumer_name()),
            port: match env::var("STATION_SYNC_PORT") {
                Ok(v) => v.parse().with_context(|| format!("Invalid STATION_SYNC_PORT: {}", v))?,
                Err(_) => default_port(),
            },
            storage,
            timeseries,
            origins,
            metadata,
        })
    }

    pub fn origin_ids(&self) -> Vec<String> {
        self.origins.iter().map(|o| o.id.clone()).collect()
    }

    /// Data types of all origins, first declaration of each id wins.
    pub fn data_types(&self) -> Vec<DataType> {
        let mut types: Vec<DataType> = Vec::new();
        for data_type in self.origins.iter().flat_map(|o| o.data_types.iter()) {
            if !types.iter().any(|t| t.id == data_type.id) {
                types.push(data_type.clone());
            }
        }
        types
    }
}

/// Parse `origin=stream,origin2=stream2`.
pub fn parse_origins(value: &str) -> Result<Vec<OriginConfig>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|entry| {
            let (id, stream) = entry
                .split_once('=')
                .with_context(|| format!("Invalid origin entry (expected origin=stream): {}", entry))?;
            let mut mapping = FieldMapping::new("id");
            mapping.name_field = Some("name".to_string());
            mapping.latitude_field = Some("latitude".to_string());
            mapping.longitude_field = Some("longitude".to_string());
            Ok(OriginConfig {
                id: id.trim().to_string(),
                stream: stream.trim().to_string(),
                mapping,
                data_types: Vec::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        let origins = parse_origins("merano=raw:merano, bolzano=raw:bolzano").unwrap();
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1].id, "bolzano");
        assert_eq!(origins[1].stream, "raw:bolzano");
        assert_eq!(origins[0].mapping.id_field, "id");
    }

    #[test]
    fn test_parse_origins_invalid() {
        assert!(parse_origins("merano").is_err());
    }

    #[test]
    fn test_data_types_deduplicated() {
        let mut a = parse_origins("a=s1").unwrap().remove(0);
        a.data_types = vec![DataType::new("free"), DataType::new("occupied")];
        let mut b = parse_origins("b=s2").unwrap().remove(0);
        b.data_types = vec![DataType::new("free")];

        let config = SyncConfig {
            redis_url: "redis://r".to_string(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            port: default_port(),
            storage: ObjectStorageConfig::default(),
            timeseries: TimeSeriesConfig::default(),
            origins: vec![a, b],
            metadata: None,
        };

        let ids: Vec<_> = config.data_types().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["free", "occupied"]);
        assert_eq!(config.origin_ids(), vec!["a", "b"]);
    }
}

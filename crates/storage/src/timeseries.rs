//! HTTP client for the time-series writer API.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET  /json/stations/{stationType}?origin=..`
//! - `POST /json/syncStations/{stationType}?prn=..&prv=..&origin=..`
//! - `POST /json/pushRecords`
//! - `POST /json/syncDataTypes`

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use ingress_common::{IngressError, IngressResult};
use station_cache::{DataType, Metadata, RecordBatch, StationRecord, StationSink, StationSource};

/// Time-series API client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    pub base_url: String,
    pub station_type: String,
    pub provenance_name: String,
    pub provenance_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8999".to_string(),
            station_type: "ParkingStation".to_string(),
            provenance_name: "station-sync".to_string(),
            provenance_version: env!("CARGO_PKG_VERSION").to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Station as exchanged with the writer API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StationDto {
    id: String,
    name: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    station_type: Option<String>,
    #[serde(default)]
    meta_data: Metadata,
}

impl StationDto {
    fn from_record(record: &StationRecord, station_type: &str) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            latitude: Some(record.latitude),
            longitude: Some(record.longitude),
            origin: Some(record.origin.clone()),
            station_type: Some(station_type.to_string()),
            meta_data: record.metadata.clone(),
        }
    }

    fn into_record(self, fallback_origin: &str) -> StationRecord {
        StationRecord {
            id: self.id,
            name: self.name,
            latitude: self.latitude.unwrap_or_default(),
            longitude: self.longitude.unwrap_or_default(),
            origin: self.origin.unwrap_or_else(|| fallback_origin.to_string()),
            metadata: self.meta_data,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataTypeDto<'a> {
    name: &'a str,
    unit: &'a str,
    description: &'a str,
    rtype: &'a str,
    meta_data: &'a Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvenanceDto {
    lineage: String,
    data_collector: String,
    data_collector_version: String,
}

#[derive(Debug, Serialize)]
struct RecordDto<'a> {
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
    value: &'a serde_json::Value,
    period: u32,
}

/// Push body: station id -> data type id -> values.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushRecordsDto<'a> {
    station_type: &'a str,
    provenance: ProvenanceDto,
    records: BTreeMap<&'a str, BTreeMap<&'a str, Vec<RecordDto<'a>>>>,
}

/// Client for the time-series writer API.
pub struct TimeSeriesClient {
    client: Client,
    config: TimeSeriesConfig,
}

impl TimeSeriesClient {
    pub fn new(config: TimeSeriesConfig) -> IngressResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IngressError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TimeSeriesConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn provenance(&self, origin: &str) -> ProvenanceDto {
        ProvenanceDto {
            lineage: origin.to_string(),
            data_collector: self.config.provenance_name.clone(),
            data_collector_version: self.config.provenance_version.clone(),
        }
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &T,
    ) -> IngressResult<()> {
        let response = self
            .client
            .post(url)
            .query(query)
            .json(body)
            .send()
            .await
            .map_err(|e| IngressError::UpsertFailure(format!("POST {} failed: {}", url, e)))?;
        check_status(response, url)
            .await
            .map_err(IngressError::UpsertFailure)?;
        Ok(())
    }
}

/// Turn a non-2xx response into a message including the response body.
async fn check_status(response: Response, url: &str) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("{} returned {}: {}", url, status, body))
}

#[async_trait]
impl StationSource for TimeSeriesClient {
    #[instrument(skip(self), fields(station_type = %self.config.station_type))]
    async fn fetch_stations(&self, origin: &str) -> IngressResult<Vec<StationRecord>> {
        let url = self.url(&format!("/json/stations/{}", self.config.station_type));
        let response = self
            .client
            .get(&url)
            .query(&[("origin", origin)])
            .send()
            .await
            .map_err(|e| IngressError::HttpError(format!("GET {} failed: {}", url, e)))?;
        let response = check_status(response, &url)
            .await
            .map_err(IngressError::HttpError)?;

        let stations: Vec<StationDto> = response
            .json()
            .await
            .map_err(|e| IngressError::HttpError(format!("Invalid station list from {}: {}", url, e)))?;

        debug!(count = stations.len(), "Fetched stations");
        Ok(stations
            .into_iter()
            .map(|dto| dto.into_record(origin))
            .collect())
    }
}

#[async_trait]
impl StationSink for TimeSeriesClient {
    #[instrument(skip(self, stations), fields(stations = stations.len()))]
    async fn sync_stations(&self, stations: &[StationRecord]) -> IngressResult<()> {
        let mut by_origin: BTreeMap<&str, Vec<StationDto>> = BTreeMap::new();
        for station in stations {
            by_origin
                .entry(station.origin.as_str())
                .or_default()
                .push(StationDto::from_record(station, &self.config.station_type));
        }

        let url = self.url(&format!("/json/syncStations/{}", self.config.station_type));
        for (origin, dtos) in by_origin {
            let query = [
                ("prn", self.config.provenance_name.as_str()),
                ("prv", self.config.provenance_version.as_str()),
                ("origin", origin),
            ];
            self.post_json(&url, &query, &dtos).await?;
            info!(origin = %origin, count = dtos.len(), "Synced stations");
        }
        Ok(())
    }

    #[instrument(skip(self, batch), fields(series = batch.len()))]
    async fn push_records(&self, origin: &str, batch: &RecordBatch) -> IngressResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut records: BTreeMap<&str, BTreeMap<&str, Vec<RecordDto>>> = BTreeMap::new();
        for (station_id, data_type_id, values) in batch.iter() {
            let series = records
                .entry(station_id)
                .or_default()
                .entry(data_type_id)
                .or_default();
            series.extend(values.iter().map(|m| RecordDto {
                timestamp: m.timestamp.timestamp_millis(),
                value: &m.value,
                period: m.period,
            }));
        }

        let body = PushRecordsDto {
            station_type: &self.config.station_type,
            provenance: self.provenance(origin),
            records,
        };
        let url = self.url("/json/pushRecords");
        self.post_json(&url, &[], &body).await?;
        info!(origin = %origin, measurements = batch.measurement_count(), "Pushed records");
        Ok(())
    }

    #[instrument(skip(self, data_types), fields(count = data_types.len()))]
    async fn sync_data_types(&self, data_types: &[DataType]) -> IngressResult<()> {
        let body: Vec<DataTypeDto> = data_types
            .iter()
            .map(|t| DataTypeDto {
                name: &t.id,
                unit: &t.unit,
                description: &t.description,
                rtype: &t.rtype,
                meta_data: &t.metadata,
            })
            .collect();
        let url = self.url("/json/syncDataTypes");
        self.post_json(&url, &[], &body).await
    }
}

//! Station and time-series data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Station metadata: field name to scalar or string value.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A physical measuring entity as known to the time-series store.
///
/// Identity is `id`. Several origins may describe the same station, each
/// contributing its own metadata keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub origin: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StationRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude: 0.0,
            longitude: 0.0,
            origin: origin.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Key-wise union of two metadata maps; `incoming` wins on conflicts.
pub fn merge_metadata(existing: &Metadata, incoming: &Metadata) -> Metadata {
    let mut merged = existing.clone();
    merged.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Merge an incoming record onto the previously known one.
///
/// Scalar attributes come from the incoming record; metadata is the
/// key-wise union favoring incoming values.
pub fn merge_station(existing: Option<&StationRecord>, incoming: StationRecord) -> StationRecord {
    match existing {
        Some(existing) => {
            let metadata = merge_metadata(&existing.metadata, &incoming.metadata);
            StationRecord {
                metadata,
                ..incoming
            }
        }
        None => incoming,
    }
}

/// Immutable set of stations keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationSet {
    stations: BTreeMap<String, StationRecord>,
}

impl StationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, merging records that share an id in order.
    pub fn from_records(records: impl IntoIterator<Item = StationRecord>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.upsert(record);
        }
        set
    }

    /// Merge one record into the set and return the stored result.
    pub fn upsert(&mut self, incoming: StationRecord) -> &StationRecord {
        let merged = merge_station(self.stations.get(&incoming.id), incoming);
        let id = merged.id.clone();
        self.stations.insert(id.clone(), merged);
        &self.stations[&id]
    }

    pub fn get(&self, id: &str) -> Option<&StationRecord> {
        self.stations.get(id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationRecord> {
        self.stations.values()
    }

    pub fn into_records(self) -> Vec<StationRecord> {
        self.stations.into_values().collect()
    }
}

/// Measurement type registered with the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataType {
    pub id: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    /// Aggregation type, e.g. `Instantaneous` or `Mean`.
    #[serde(default = "default_rtype")]
    pub rtype: String,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_rtype() -> String {
    "Instantaneous".to_string()
}

impl DataType {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            unit: String::new(),
            description: String::new(),
            rtype: default_rtype(),
            metadata: Metadata::new(),
        }
    }
}

/// Single time-series value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub value: serde_json::Value,
    /// Sampling period in seconds.
    pub period: u32,
}

/// Time-series values keyed by `(station id, data type id)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    entries: BTreeMap<(String, String), Vec<Measurement>>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, station_id: impl Into<String>, data_type_id: impl Into<String>, measurement: Measurement) {
        self.entries
            .entry((station_id.into(), data_type_id.into()))
            .or_default()
            .push(measurement);
    }

    pub fn get(&self, station_id: &str, data_type_id: &str) -> Option<&[Measurement]> {
        self.entries
            .get(&(station_id.to_string(), data_type_id.to_string()))
            .map(Vec::as_slice)
    }

    /// Number of `(station, data type)` series.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of measurements across all series.
    pub fn measurement_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[Measurement])> {
        self.entries
            .iter()
            .map(|((station, data_type), values)| (station.as_str(), data_type.as_str(), values.as_slice()))
    }
}

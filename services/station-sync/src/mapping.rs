//! Payload to station mapping.
//!
//! Every origin ships a different DTO. A [`FieldMapping`] describes where the
//! station id, name, position, metadata and measurements live in one entry
//! of the payload. Field names may be dotted paths into nested objects
//! (`data.position.latitude`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use ingress_common::{parse_timestamp, IngressError, IngressResult};
use station_cache::{Measurement, Metadata, RecordBatch, StationRecord};

/// Default sampling period in seconds.
pub const DEFAULT_PERIOD: u32 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field holding the payload as an embedded JSON string.
    #[serde(default)]
    pub payload_field: Option<String>,
    /// Field holding the entry array when the payload is an object.
    #[serde(default)]
    pub items_field: Option<String>,
    pub id_field: String,
    #[serde(default)]
    pub id_prefix: Option<String>,
    /// Lowercase the id and strip whitespace.
    #[serde(default)]
    pub normalize_id: bool,
    #[serde(default)]
    pub name_field: Option<String>,
    #[serde(default)]
    pub latitude_field: Option<String>,
    #[serde(default)]
    pub longitude_field: Option<String>,
    /// Source field -> metadata key.
    #[serde(default)]
    pub metadata_fields: BTreeMap<String, String>,
    /// Metadata set on every station of the origin.
    #[serde(default)]
    pub static_metadata: Metadata,
    /// Source field -> data type id.
    #[serde(default)]
    pub measurements: BTreeMap<String, String>,
    #[serde(default)]
    pub timestamp_field: Option<String>,
    #[serde(default = "default_period")]
    pub period: u32,
}

fn default_period() -> u32 {
    DEFAULT_PERIOD
}

impl FieldMapping {
    /// Mapping with only an id field; everything else at its default.
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            payload_field: None,
            items_field: None,
            id_field: id_field.into(),
            id_prefix: None,
            normalize_id: false,
            name_field: None,
            latitude_field: None,
            longitude_field: None,
            metadata_fields: BTreeMap::new(),
            static_metadata: Metadata::new(),
            measurements: BTreeMap::new(),
            timestamp_field: None,
            period: DEFAULT_PERIOD,
        }
    }
}

/// Stations and time-series records extracted from one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedPayload {
    pub stations: Vec<StationRecord>,
    pub records: RecordBatch,
    /// Entries dropped for lacking an id.
    pub skipped: usize,
}

/// Map a parsed payload to stations of `origin`.
///
/// `received_at` is used as measurement time when an entry carries no
/// usable timestamp.
pub fn map_payload(
    mapping: &FieldMapping,
    origin: &str,
    payload: &Value,
    received_at: DateTime<Utc>,
) -> IngressResult<MappedPayload> {
    let unwrapped;
    let payload = match &mapping.payload_field {
        Some(field) => {
            let embedded = lookup(payload, field)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    IngressError::MalformedPayload(format!("Missing embedded payload field {}", field))
                })?;
            unwrapped = serde_json::from_str::<Value>(embedded).map_err(|e| {
                IngressError::MalformedPayload(format!("Embedded payload is not JSON: {}", e))
            })?;
            &unwrapped
        }
        None => payload,
    };

    let entries: Vec<&Value> = match (payload, &mapping.items_field) {
        (Value::Array(items), None) => items.iter().collect(),
        (Value::Object(_), Some(field)) => lookup(payload, field)
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .ok_or_else(|| {
                IngressError::MalformedPayload(format!("Missing entry array {}", field))
            })?,
        (Value::Object(_), None) => vec![payload],
        _ => {
            return Err(IngressError::MalformedPayload(
                "Payload must be an object or an array of objects".to_string(),
            ))
        }
    };

    let mut mapped = MappedPayload::default();
    for entry in entries {
        let Some(id) = station_id(mapping, entry) else {
            warn!(origin = %origin, id_field = %mapping.id_field, "Entry without station id skipped");
            mapped.skipped += 1;
            continue;
        };

        let name = mapping
            .name_field
            .as_deref()
            .and_then(|f| lookup(entry, f))
            .and_then(text)
            .unwrap_or_else(|| id.clone());

        let latitude = coordinate(entry, mapping.latitude_field.as_deref());
        let longitude = coordinate(entry, mapping.longitude_field.as_deref());

        let mut station =
            StationRecord::new(id.clone(), name, origin).with_position(latitude, longitude);
        station.metadata = mapping.static_metadata.clone();
        for (field, key) in &mapping.metadata_fields {
            if let Some(value) = lookup(entry, field).filter(|v| !v.is_null()) {
                station.metadata.insert(key.clone(), value.clone());
            }
        }

        let timestamp = entry_timestamp(mapping, entry).unwrap_or(received_at);
        for (field, data_type) in &mapping.measurements {
            if let Some(value) = lookup(entry, field).filter(|v| !v.is_null()) {
                mapped.records.push(
                    id.clone(),
                    data_type.clone(),
                    Measurement {
                        timestamp,
                        value: value.clone(),
                        period: mapping.period,
                    },
                );
            }
        }

        mapped.stations.push(station);
    }

    debug!(
        origin = %origin,
        stations = mapped.stations.len(),
        measurements = mapped.records.measurement_count(),
        skipped = mapped.skipped,
        "Payload mapped"
    );

    Ok(mapped)
}

/// Resolve a dotted path.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Scalar as text; numbers are formatted, other shapes are rejected.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn station_id(mapping: &FieldMapping, entry: &Value) -> Option<String> {
    let raw = lookup(entry, &mapping.id_field).and_then(text)?;
    let id = if mapping.normalize_id {
        raw.chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase()
    } else {
        raw
    };
    if id.is_empty() {
        return None;
    }
    Some(match &mapping.id_prefix {
        Some(prefix) => format!("{}{}", prefix, id),
        None => id,
    })
}

fn coordinate(entry: &Value, field: Option<&str>) -> f64 {
    field
        .and_then(|f| lookup(entry, f))
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0.0)
}

fn entry_timestamp(mapping: &FieldMapping, entry: &Value) -> Option<DateTime<Utc>> {
    let field = mapping.timestamp_field.as_deref()?;
    let value = lookup(entry, field)?;
    match value {
        Value::String(s) => match parse_timestamp(s) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(field = %field, error = %e, "Unparseable timestamp, using receipt time");
                None
            }
        },
        // Epoch milliseconds.
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn parking_mapping() -> FieldMapping {
        let mut mapping = FieldMapping::new("id");
        mapping.name_field = Some("name".to_string());
        mapping.latitude_field = Some("lat".to_string());
        mapping.longitude_field = Some("lon".to_string());
        mapping.metadata_fields.insert("capacity".to_string(), "capacity".to_string());
        mapping.measurements.insert("free".to_string(), "free".to_string());
        mapping.timestamp_field = Some("updated".to_string());
        mapping
    }

    #[test]
    fn test_array_payload() {
        let payload = json!([
            {"id": "p1", "name": "Central", "lat": 46.67, "lon": "11.16", "capacity": 120, "free": 12, "updated": "2024-01-15T11:55:00"},
            {"id": "p2", "free": 3}
        ]);

        let mapped = map_payload(&parking_mapping(), "merano", &payload, received_at()).unwrap();

        assert_eq!(mapped.stations.len(), 2);
        let p1 = &mapped.stations[0];
        assert_eq!(p1.name, "Central");
        assert_eq!(p1.longitude, 11.16);
        assert_eq!(p1.metadata["capacity"], json!(120));
        assert_eq!(mapped.stations[1].name, "p2");
        assert_eq!(mapped.stations[1].latitude, 0.0);

        let free = mapped.records.get("p1", "free").unwrap();
        assert_eq!(free[0].value, json!(12));
        assert_eq!(free[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 11, 55, 0).unwrap());
        assert_eq!(mapped.records.get("p2", "free").unwrap()[0].timestamp, received_at());
    }

    #[test]
    fn test_items_field() {
        let mut mapping = FieldMapping::new("code");
        mapping.items_field = Some("result.items".to_string());
        let payload = json!({"result": {"items": [{"code": "A"}, {"code": "B"}]}});

        let mapped = map_payload(&mapping, "bz", &payload, received_at()).unwrap();
        assert_eq!(mapped.stations.len(), 2);
    }

    #[test]
    fn test_single_object_with_embedded_payload() {
        let mut mapping = FieldMapping::new("data.guid");
        mapping.payload_field = Some("Payload".to_string());
        mapping.latitude_field = Some("data.position.latitude".to_string());
        let payload = json!({
            "MsgId": 1,
            "Payload": r#"{"data":{"guid":"G-1","position":{"latitude":46.6}}}"#
        });

        let mapped = map_payload(&mapping, "merano", &payload, received_at()).unwrap();
        assert_eq!(mapped.stations[0].id, "G-1");
        assert_eq!(mapped.stations[0].latitude, 46.6);
    }

    #[test]
    fn test_missing_id_skipped() {
        let payload = json!([{"name": "no id"}, {"id": ""}, {"id": "ok"}]);
        let mapped = map_payload(&FieldMapping::new("id"), "x", &payload, received_at()).unwrap();
        assert_eq!(mapped.stations.len(), 1);
        assert_eq!(mapped.skipped, 2);
    }

    #[test]
    fn test_normalized_prefixed_id() {
        let mut mapping = FieldMapping::new("id");
        mapping.normalize_id = true;
        mapping.id_prefix = Some("me:".to_string());
        let payload = json!([{"id": " Park A 1 "}, {"id": 42}]);

        let mapped = map_payload(&mapping, "merano", &payload, received_at()).unwrap();
        assert_eq!(mapped.stations[0].id, "me:parka1");
        assert_eq!(mapped.stations[1].id, "me:42");
    }

    #[test]
    fn test_static_metadata_and_null_fields() {
        let mut mapping = FieldMapping::new("id");
        mapping.static_metadata.insert("provider".to_string(), json!("municipality"));
        mapping.metadata_fields.insert("phone".to_string(), "phone".to_string());
        let payload = json!([{"id": "a", "phone": null}]);

        let mapped = map_payload(&mapping, "x", &payload, received_at()).unwrap();
        let station = &mapped.stations[0];
        assert_eq!(station.metadata["provider"], json!("municipality"));
        assert!(!station.metadata.contains_key("phone"));
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let mut mapping = FieldMapping::new("id");
        mapping.timestamp_field = Some("ts".to_string());
        mapping.measurements.insert("v".to_string(), "value".to_string());
        let payload = json!([{"id": "a", "ts": 1705320000000i64, "v": 1}]);

        let mapped = map_payload(&mapping, "x", &payload, received_at()).unwrap();
        assert_eq!(mapped.records.get("a", "value").unwrap()[0].timestamp, received_at());
    }

    #[test]
    fn test_scalar_payload_rejected() {
        let err = map_payload(&FieldMapping::new("id"), "x", &json!(5), received_at()).unwrap_err();
        assert_eq!(err.kind(), "malformed_payload");
    }

    #[test]
    fn test_missing_items_rejected() {
        let mut mapping = FieldMapping::new("id");
        mapping.items_field = Some("items".to_string());
        assert!(map_payload(&mapping, "x", &json!({"other": []}), received_at()).is_err());
    }
}

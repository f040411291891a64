//! Common test fixtures.

use std::io::Write;

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;

use station_cache::StationRecord;
use storage::{RawRecord, RawReference};

/// Fixed receipt instant used across tests.
pub fn received_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

/// Provider strings.
pub mod providers {
    pub const PARKING_BOLZANO: &str = "parking/bolzano";
    pub const PARKING_MERANO: &str = "parking/merano";
    pub const TOURISM_FASTLINE: &str = "mobility/tourism?fastline=true";
    pub const NOT_A_URI: &str = "not a uri";
}

/// A station with metadata from `pairs`.
pub fn station(id: &str, origin: &str, pairs: &[(&str, serde_json::Value)]) -> StationRecord {
    pairs.iter().fold(
        StationRecord::new(id, format!("Station {}", id), origin).with_position(46.5, 11.35),
        |station, (key, value)| station.with_metadata(*key, value.clone()),
    )
}

/// Stored raw record with a text payload.
pub fn raw_record(provider: &str, payload: &str) -> RawRecord {
    RawRecord {
        provider: provider.to_string(),
        timestamp: received_at(),
        rawdata: serde_json::Value::String(payload.to_string()),
    }
}

pub fn raw_reference(collection: &str, id: &str) -> RawReference {
    RawReference::new("ingress", collection, id)
}

/// Encode a workbook the way the spreadsheet collector ships it:
/// base64url of gzip of JSON.
pub fn encode_workbook(workbook: &serde_json::Value) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(workbook.to_string().as_bytes())
        .unwrap();
    let compressed = encoder.finish().unwrap();
    base64::engine::general_purpose::URL_SAFE.encode(compressed)
}

/// Enrichment workbook with one `Parking` sheet.
///
/// `rows` are `(station id, name_de, name_it)`.
pub fn parking_workbook(rows: &[(&str, Option<&str>, Option<&str>)]) -> serde_json::Value {
    let mut sheet_rows = vec![json!(["id", "name", "type", "name_de", "name_it"])];
    sheet_rows.extend(
        rows.iter()
            .map(|(id, de, it)| json!([id, null, null, de, it])),
    );
    json!({
        "sheets": [
            {"title": "Parking", "rows": sheet_rows}
        ]
    })
}

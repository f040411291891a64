//! Metadata enrichment from a tabular source.
//!
//! The enrichment source is a workbook exported from a spreadsheet and
//! shipped as base64url(gzip(JSON)):
//!
//! ```json
//! {"sheets": [{"title": "Parking", "rows": [["id", "name", "type", "name_de"], ["a", null, null, "Parkplatz"]]}]}
//! ```
//!
//! Row 0 names the fields, column 0 holds the station id. Columns from the
//! first enrichment column onward become metadata keys.

use std::collections::BTreeMap;
use std::io::Read;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ingress_common::{IngressError, IngressResult};

use crate::station::{Metadata, StationRecord};

/// URL-safe alphabet, padding optional.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Default index of the first enrichment column.
pub const DEFAULT_FIRST_FIELD_COLUMN: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub title: String,
    #[serde(default)]
    pub rows: Vec<Vec<Option<serde_json::Value>>>,
}

impl Workbook {
    /// Decode a base64url(gzip(JSON)) payload.
    pub fn decode(payload: &str) -> IngressResult<Self> {
        debug!("decoding enrichment payload from base64");
        let compressed = URL_SAFE_LENIENT
            .decode(payload.trim())
            .map_err(|e| IngressError::Decode(format!("base64: {}", e)))?;

        debug!(bytes = compressed.len(), "decoding enrichment payload from gzip");
        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| IngressError::Decode(format!("gzip: {}", e)))?;

        serde_json::from_slice(&json).map_err(|e| IngressError::Decode(format!("workbook JSON: {}", e)))
    }

    pub fn sheet(&self, title: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.title == title)
    }
}

/// Text of a cell. Numbers and booleans use their JSON rendering.
fn cell_text(cell: &serde_json::Value) -> Option<String> {
    match cell {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Per-station enrichment values, built once per metadata sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentOverlay {
    fields: Vec<String>,
    by_station: BTreeMap<String, Metadata>,
}

impl EnrichmentOverlay {
    /// Build the overlay from the sheet titled `sheet_name`.
    ///
    /// Fails with `EnrichmentSourceMissing` if no such sheet exists.
    pub fn from_workbook(workbook: &Workbook, sheet_name: &str, first_field_column: usize) -> IngressResult<Self> {
        let sheet = workbook.sheet(sheet_name).ok_or_else(|| {
            IngressError::EnrichmentSourceMissing(format!("sheet '{}' not found", sheet_name))
        })?;
        Ok(Self::from_rows(&sheet.rows, first_field_column))
    }

    fn from_rows(rows: &[Vec<Option<serde_json::Value>>], first_field_column: usize) -> Self {
        let Some((header, body)) = rows.split_first() else {
            return Self::default();
        };

        let header: Vec<String> = header
            .iter()
            .map(|cell| cell.as_ref().and_then(cell_text).unwrap_or_default().trim().to_string())
            .collect();

        let columns: Vec<(usize, &String)> = header
            .iter()
            .enumerate()
            .skip(first_field_column)
            .filter(|(_, name)| !name.is_empty())
            .collect();

        let mut by_station = BTreeMap::new();
        for row in body {
            let Some(id) = row.first().and_then(|c| c.as_ref()).and_then(cell_text) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }

            let values: Metadata = columns
                .iter()
                .filter_map(|(index, name)| {
                    let value = row.get(*index)?.as_ref().and_then(cell_text)?;
                    Some(((*name).clone(), serde_json::Value::String(value)))
                })
                .collect();
            by_station.insert(id, values);
        }

        Self {
            fields: columns.into_iter().map(|(_, name)| name.clone()).collect(),
            by_station,
        }
    }

    /// Enrichment field names, in column order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn get(&self, station_id: &str) -> Option<&Metadata> {
        self.by_station.get(station_id)
    }

    /// Number of stations listed in the sheet.
    pub fn len(&self) -> usize {
        self.by_station.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_station.is_empty()
    }

    /// Overwrite enrichment fields on every listed station.
    ///
    /// Only non-null sheet values are written; other metadata is untouched.
    /// Returns the number of stations that received at least one value.
    pub fn apply(&self, stations: &mut [StationRecord]) -> usize {
        let mut enriched = 0;
        for station in stations.iter_mut() {
            if let Some(values) = self.by_station.get(&station.id) {
                if !values.is_empty() {
                    enriched += 1;
                }
                station
                    .metadata
                    .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        enriched
    }
}

//! Station metadata merge cache.
//!
//! Reconciles partial, multi-source station updates against the last known
//! station set before they are pushed to the time-series store.

pub mod cache;
pub mod enrichment;
pub mod source;
pub mod station;

pub use cache::{MergeCache, MergeCacheStats, MergeCacheStatsSnapshot};
pub use enrichment::{EnrichmentOverlay, Sheet, Workbook, DEFAULT_FIRST_FIELD_COLUMN};
pub use source::{StationSink, StationSource};
pub use station::{
    merge_metadata, merge_station, DataType, Measurement, Metadata, RecordBatch, StationRecord,
    StationSet,
};

//! Collaborator traits for the station store.
//!
//! The cache never talks to the network itself: the time-series store is
//! reached through these traits so tests can swap in fakes.

use async_trait::async_trait;

use ingress_common::IngressResult;

use crate::station::{DataType, RecordBatch, StationRecord};

/// Read side of the time-series store.
#[async_trait]
pub trait StationSource: Send + Sync {
    /// Fetch every station currently registered for `origin`.
    async fn fetch_stations(&self, origin: &str) -> IngressResult<Vec<StationRecord>>;
}

/// Write side of the time-series store.
///
/// Failures are reported as `IngressError::UpsertFailure`.
#[async_trait]
pub trait StationSink: Send + Sync {
    /// Upsert stations. Implementations group them by origin.
    async fn sync_stations(&self, stations: &[StationRecord]) -> IngressResult<()>;

    /// Push time-series values under the provenance of `origin`.
    async fn push_records(&self, origin: &str, batch: &RecordBatch) -> IngressResult<()>;

    /// Register measurement types.
    async fn sync_data_types(&self, data_types: &[DataType]) -> IngressResult<()>;
}

//! In-memory fakes of the external collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ingress::{Channel, RoutedMessage};
use ingress_common::{IngressError, IngressResult};
use station_cache::{DataType, RecordBatch, StationRecord, StationSink, StationSource};
use storage::{ChannelPublisher, RawPayloadStore, RawRecord, RawReference};

/// [`StationSource`] serving a fixed station list per origin.
#[derive(Default)]
pub struct InMemoryStationSource {
    stations: Mutex<HashMap<String, Vec<StationRecord>>>,
    fail: AtomicBool,
    fetches: AtomicU64,
}

impl InMemoryStationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stations served for `origin`.
    pub fn set_stations(&self, origin: &str, stations: Vec<StationRecord>) {
        self.stations
            .lock()
            .unwrap()
            .insert(origin.to_string(), stations);
    }

    pub fn with_stations(self, origin: &str, stations: Vec<StationRecord>) -> Self {
        self.set_stations(origin, stations);
        self
    }

    /// Make every following fetch fail with `HttpError`.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StationSource for InMemoryStationSource {
    async fn fetch_stations(&self, origin: &str) -> IngressResult<Vec<StationRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngressError::HttpError(format!("fetch {} failed", origin)));
        }
        Ok(self
            .stations
            .lock()
            .unwrap()
            .get(origin)
            .cloned()
            .unwrap_or_default())
    }
}

/// [`StationSink`] recording every call, with optional failure injection
/// and an optional delay to widen race windows in concurrency tests.
#[derive(Default)]
pub struct RecordingSink {
    station_syncs: Mutex<Vec<Vec<StationRecord>>>,
    record_pushes: Mutex<Vec<(String, RecordBatch)>>,
    data_types: Mutex<Vec<DataType>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `UpsertFailure`.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Batches passed to `sync_stations`, in call order.
    pub fn station_syncs(&self) -> Vec<Vec<StationRecord>> {
        self.station_syncs.lock().unwrap().clone()
    }

    /// Most recent version of each station pushed, by id.
    pub fn latest_station(&self, id: &str) -> Option<StationRecord> {
        self.station_syncs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .flat_map(|batch| batch.iter())
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn record_pushes(&self) -> Vec<(String, RecordBatch)> {
        self.record_pushes.lock().unwrap().clone()
    }

    pub fn data_types(&self) -> Vec<DataType> {
        self.data_types.lock().unwrap().clone()
    }

    async fn before_call(&self, what: &str) -> IngressResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngressError::UpsertFailure(format!("{} rejected", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl StationSink for RecordingSink {
    async fn sync_stations(&self, stations: &[StationRecord]) -> IngressResult<()> {
        self.before_call("syncStations").await?;
        self.station_syncs.lock().unwrap().push(stations.to_vec());
        Ok(())
    }

    async fn push_records(&self, origin: &str, batch: &RecordBatch) -> IngressResult<()> {
        self.before_call("pushRecords").await?;
        self.record_pushes
            .lock()
            .unwrap()
            .push((origin.to_string(), batch.clone()));
        Ok(())
    }

    async fn sync_data_types(&self, data_types: &[DataType]) -> IngressResult<()> {
        self.before_call("syncDataTypes").await?;
        self.data_types.lock().unwrap().extend_from_slice(data_types);
        Ok(())
    }
}

/// [`RawPayloadStore`] backed by a map.
#[derive(Default)]
pub struct InMemoryRawStore {
    records: Mutex<HashMap<RawReference, RawRecord>>,
}

impl InMemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: RawReference, record: RawRecord) {
        self.records.lock().unwrap().insert(reference, record);
    }
}

#[async_trait]
impl RawPayloadStore for InMemoryRawStore {
    async fn get_raw(&self, reference: &RawReference) -> IngressResult<RawRecord> {
        self.records
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| IngressError::StorageError(format!("Object not found: {}", reference)))
    }
}

/// [`ChannelPublisher`] capturing published messages.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<RoutedMessage>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail with `QueueError`.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<RoutedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, channel: Channel) -> Vec<RoutedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.decision.channel == channel)
            .collect()
    }
}

#[async_trait]
impl ChannelPublisher for RecordingPublisher {
    async fn publish(&self, message: &RoutedMessage) -> IngressResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngressError::QueueError("broker unavailable".to_string()));
        }
        let mut published = self.published.lock().unwrap();
        published.push(message.clone());
        Ok(format!("{}-0", published.len()))
    }
}

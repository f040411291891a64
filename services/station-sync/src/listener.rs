//! Update stream listeners.
//!
//! One listener runs per origin stream plus one for the enrichment
//! workbook stream. Each entry carries a [`RawReference`]; the listener
//! fetches the stored payload, hands it to its handler and acknowledges the
//! entry whatever the outcome. Redelivery is the broker's concern.

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, instrument, warn};

use ingress_common::{IngressError, IngressResult};
use station_cache::{EnrichmentOverlay, MergeCache, StationSink, Workbook};
use storage::{RawPayloadStore, RawReference, StreamConsumer, StreamDelivery};

use crate::config::{MetadataConfig, OriginConfig};
use crate::mapping::map_payload;

/// Source of stream entries for a listener.
#[async_trait]
pub trait UpdateStream: Send {
    fn name(&self) -> &str;
    async fn claim_next(&mut self) -> IngressResult<Option<StreamDelivery>>;
    async fn ack(&mut self, entry_id: &str) -> IngressResult<()>;
}

#[async_trait]
impl UpdateStream for StreamConsumer {
    fn name(&self) -> &str {
        self.stream()
    }

    async fn claim_next(&mut self) -> IngressResult<Option<StreamDelivery>> {
        StreamConsumer::claim_next(self).await
    }

    async fn ack(&mut self, entry_id: &str) -> IngressResult<()> {
        StreamConsumer::ack(self, entry_id).await
    }
}

/// Processes the data of one stream entry.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, data: &str) -> IngressResult<HandleSummary>;
}

/// What a handled message produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandleSummary {
    pub stations: usize,
    pub measurements: usize,
}

/// Counters shared by all listeners.
#[derive(Debug, Default)]
pub struct ListenerStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListenerStatsSnapshot {
    pub processed: u64,
    pub failed: u64,
}

impl ListenerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn parse_reference(data: &str) -> IngressResult<RawReference> {
    serde_json::from_str(data)
        .map_err(|e| IngressError::MalformedPayload(format!("Invalid payload reference: {}", e)))
}

/// Handles payload references of one origin: map, merge, push.
pub struct OriginHandler {
    origin: OriginConfig,
    cache: Arc<MergeCache>,
    raw_store: Arc<dyn RawPayloadStore>,
    sink: Arc<dyn StationSink>,
}

impl OriginHandler {
    pub fn new(
        origin: OriginConfig,
        cache: Arc<MergeCache>,
        raw_store: Arc<dyn RawPayloadStore>,
        sink: Arc<dyn StationSink>,
    ) -> Self {
        Self {
            origin,
            cache,
            raw_store,
            sink,
        }
    }
}

#[async_trait]
impl MessageHandler for OriginHandler {
    #[instrument(skip(self, data), fields(origin = %self.origin.id))]
    async fn handle(&self, data: &str) -> IngressResult<HandleSummary> {
        let reference = parse_reference(data)?;
        let raw = self.raw_store.get_raw(&reference).await?;

        let payload: serde_json::Value = serde_json::from_str(&raw.payload_text())
            .map_err(|e| IngressError::MalformedPayload(format!("Payload is not JSON: {}", e)))?;

        let mapped = map_payload(&self.origin.mapping, &self.origin.id, &payload, raw.timestamp)?;

        // Station upserts carry the merged metadata; records follow once
        // the stations exist downstream.
        let merged = self.cache.merge_and_push(mapped.stations).await?;
        if !mapped.records.is_empty() {
            self.sink
                .push_records(&self.origin.id, &mapped.records)
                .await?;
        }

        Ok(HandleSummary {
            stations: merged.len(),
            measurements: mapped.records.measurement_count(),
        })
    }
}

/// Handles enrichment workbooks: decode, overlay, full metadata sync.
pub struct MetadataHandler {
    config: MetadataConfig,
    origins: Vec<String>,
    cache: Arc<MergeCache>,
    raw_store: Arc<dyn RawPayloadStore>,
}

impl MetadataHandler {
    pub fn new(
        config: MetadataConfig,
        origins: Vec<String>,
        cache: Arc<MergeCache>,
        raw_store: Arc<dyn RawPayloadStore>,
    ) -> Self {
        Self {
            config,
            origins,
            cache,
            raw_store,
        }
    }
}

#[async_trait]
impl MessageHandler for MetadataHandler {
    #[instrument(skip(self, data), fields(sheet = %self.config.sheet_name))]
    async fn handle(&self, data: &str) -> IngressResult<HandleSummary> {
        let reference = parse_reference(data)?;
        let raw = self.raw_store.get_raw(&reference).await?;

        let workbook = Workbook::decode(&raw.payload_text())?;
        let overlay = EnrichmentOverlay::from_workbook(
            &workbook,
            &self.config.sheet_name,
            self.config.first_field_column,
        )?;

        let stations = self.cache.full_metadata_sync(&self.origins, &overlay).await?;

        Ok(HandleSummary {
            stations,
            measurements: 0,
        })
    }
}

/// Consume `stream` until shutdown is broadcast.
///
/// Shutdown is checked between reads, never during one: an entry the
/// broker has handed out is always handled and acknowledged before the
/// listener returns.
pub async fn run_listener<S, H>(
    mut stream: S,
    handler: Arc<H>,
    stats: Arc<ListenerStats>,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: UpdateStream,
    H: MessageHandler + ?Sized,
{
    let name = stream.name().to_string();
    info!(stream = %name, "Listener started");

    loop {
        if shutdown_requested(&mut shutdown) {
            break;
        }

        match stream.claim_next().await {
            Ok(Some(delivery)) => {
                process(&mut stream, handler.as_ref(), &stats, &name, delivery).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(stream = %name, error = %e, "Failed to read from stream");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }

    info!(stream = %name, "Listener shutting down");
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

async fn process<S, H>(
    stream: &mut S,
    handler: &H,
    stats: &ListenerStats,
    name: &str,
    delivery: StreamDelivery,
) where
    S: UpdateStream,
    H: MessageHandler + ?Sized,
{
    let outcome = match &delivery.data {
        Some(data) => handler.handle(data).await,
        None => Err(IngressError::MalformedPayload(
            "Stream entry has no data field".to_string(),
        )),
    };

    match outcome {
        Ok(summary) => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
            counter!("station_sync_messages_total", "stream" => name.to_string(), "outcome" => "ok")
                .increment(1);
            debug!(
                stream = %name,
                entry_id = %delivery.entry_id,
                stations = summary.stations,
                measurements = summary.measurements,
                "Message handled"
            );
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            counter!("station_sync_messages_total", "stream" => name.to_string(), "outcome" => "error")
                .increment(1);
            warn!(
                stream = %name,
                entry_id = %delivery.entry_id,
                kind = e.kind(),
                error = %e,
                "Message handling failed"
            );
        }
    }

    if let Err(e) = stream.ack(&delivery.entry_id).await {
        error!(stream = %name, entry_id = %delivery.entry_id, error = %e, "Ack failed");
    }
}

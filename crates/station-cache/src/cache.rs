//! Metadata merge cache.
//!
//! Holds the last known full set of stations for a group of origins and
//! merges partial updates into it before they are pushed, so metadata
//! contributed by one origin (or by the enrichment sheet) survives updates
//! from another.
//!
//! Writers (`refresh`, `merge_and_push`, `full_metadata_sync`) serialize on
//! one async mutex held across the whole read, merge, publish and push
//! sequence. Readers take a lock-free snapshot of the last published set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use ingress_common::{IngressError, IngressResult};

use crate::enrichment::EnrichmentOverlay;
use crate::source::{StationSink, StationSource};
use crate::station::{StationRecord, StationSet};

/// Operation counters.
#[derive(Debug, Default)]
pub struct MergeCacheStats {
    pub refreshes: AtomicU64,
    pub merges: AtomicU64,
    pub merged_stations: AtomicU64,
    pub upsert_failures: AtomicU64,
    pub metadata_syncs: AtomicU64,
}

/// Point-in-time copy of [`MergeCacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeCacheStatsSnapshot {
    pub stations: u64,
    pub refreshes: u64,
    pub merges: u64,
    pub merged_stations: u64,
    pub upsert_failures: u64,
    pub metadata_syncs: u64,
}

/// Process-wide station cache shared by all update handlers.
pub struct MergeCache {
    published: ArcSwap<StationSet>,
    write_lock: Mutex<()>,
    source: Arc<dyn StationSource>,
    sink: Arc<dyn StationSink>,
    stats: MergeCacheStats,
}

impl MergeCache {
    /// Create an empty cache. Call [`MergeCache::refresh`] to populate it.
    pub fn new(source: Arc<dyn StationSource>, sink: Arc<dyn StationSink>) -> Self {
        Self {
            published: ArcSwap::from_pointee(StationSet::new()),
            write_lock: Mutex::new(()),
            source,
            sink,
            stats: MergeCacheStats::default(),
        }
    }

    /// Last published station set.
    pub fn snapshot(&self) -> Arc<StationSet> {
        self.published.load_full()
    }

    pub fn get(&self, id: &str) -> Option<StationRecord> {
        self.published.load().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.published.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.load().is_empty()
    }

    pub fn stats(&self) -> MergeCacheStatsSnapshot {
        MergeCacheStatsSnapshot {
            stations: self.len() as u64,
            refreshes: self.stats.refreshes.load(Ordering::Relaxed),
            merges: self.stats.merges.load(Ordering::Relaxed),
            merged_stations: self.stats.merged_stations.load(Ordering::Relaxed),
            upsert_failures: self.stats.upsert_failures.load(Ordering::Relaxed),
            metadata_syncs: self.stats.metadata_syncs.load(Ordering::Relaxed),
        }
    }

    /// Replace the cached set with a full fetch of `origins`.
    ///
    /// The previous set stays published until every origin has been
    /// fetched. On a fetch error nothing changes.
    #[instrument(skip(self, origins), fields(origins = origins.len()))]
    pub async fn refresh(&self, origins: &[String]) -> IngressResult<usize> {
        let _guard = self.write_lock.lock().await;

        let fetched = self.fetch_all(origins).await?;
        let count = fetched.len();
        self.publish(fetched);

        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        counter!("station_cache_refresh_total").increment(1);
        info!(stations = count, "Station cache refreshed");
        Ok(count)
    }

    /// Merge incoming records into the cache and push the merged batch.
    ///
    /// Each record's metadata becomes the union of the cached metadata and
    /// its own, incoming values winning. The merged batch is published
    /// before the push; a failed push is returned as `UpsertFailure` and the
    /// cache is not rolled back.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn merge_and_push(&self, records: Vec<StationRecord>) -> IngressResult<Vec<StationRecord>> {
        let _guard = self.write_lock.lock().await;

        let current = self.published.load_full();
        let mut next = (*current).clone();
        let mut merged: Vec<StationRecord> = Vec::with_capacity(records.len());
        let mut slots: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for record in records {
            // A later record for the same id in this batch merges onto the
            // earlier one.
            let record = next.upsert(record).clone();
            match slots.get(&record.id) {
                Some(&slot) => merged[slot] = record,
                None => {
                    slots.insert(record.id.clone(), merged.len());
                    merged.push(record);
                }
            }
        }
        self.publish(next);

        self.stats.merges.fetch_add(1, Ordering::Relaxed);
        self.stats
            .merged_stations
            .fetch_add(merged.len() as u64, Ordering::Relaxed);
        counter!("station_cache_merges_total").increment(1);
        debug!(stations = merged.len(), "Merged station batch");

        self.push(&merged).await?;
        Ok(merged)
    }

    /// Re-fetch `origins`, apply the enrichment overlay and publish.
    ///
    /// The overlay is built by the caller before this runs, so a missing
    /// enrichment sheet never touches the cache.
    #[instrument(skip(self, origins, overlay), fields(origins = origins.len(), overlay = overlay.len()))]
    pub async fn full_metadata_sync(
        &self,
        origins: &[String],
        overlay: &EnrichmentOverlay,
    ) -> IngressResult<usize> {
        let _guard = self.write_lock.lock().await;

        let mut stations = self.fetch_all(origins).await?.into_records();
        let enriched = overlay.apply(&mut stations);
        let count = stations.len();
        self.publish(StationSet::from_records(stations.iter().cloned()));

        self.stats.metadata_syncs.fetch_add(1, Ordering::Relaxed);
        counter!("station_cache_metadata_sync_total").increment(1);
        info!(stations = count, enriched, "Applied metadata overlay");

        self.push(&stations).await?;
        Ok(count)
    }

    async fn fetch_all(&self, origins: &[String]) -> IngressResult<StationSet> {
        let mut set = StationSet::new();
        for origin in origins {
            let stations = self.source.fetch_stations(origin).await?;
            debug!(origin = %origin, stations = stations.len(), "Fetched stations");
            for station in stations {
                set.upsert(station);
            }
        }
        Ok(set)
    }

    fn publish(&self, set: StationSet) {
        gauge!("station_cache_stations").set(set.len() as f64);
        self.published.store(Arc::new(set));
    }

    async fn push(&self, stations: &[StationRecord]) -> IngressResult<()> {
        if stations.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.sink.sync_stations(stations).await {
            self.stats.upsert_failures.fetch_add(1, Ordering::Relaxed);
            counter!("station_cache_upsert_failures_total").increment(1);
            error!(error = %e, stations = stations.len(), "Station upsert failed");
            return Err(match e {
                IngressError::UpsertFailure(msg) => IngressError::UpsertFailure(msg),
                other => IngressError::UpsertFailure(other.to_string()),
            });
        }
        Ok(())
    }
}

//! Behavioral tests for the station merge cache against in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use station_cache::{EnrichmentOverlay, MergeCache, StationRecord, Workbook};
use test_utils::fixtures::{encode_workbook, parking_workbook, station};
use test_utils::{assert_error_kind, InMemoryStationSource, RecordingSink};

fn origins() -> Vec<String> {
    vec!["merano".to_string(), "bolzano".to_string()]
}

fn setup() -> (Arc<InMemoryStationSource>, Arc<RecordingSink>, MergeCache) {
    let source = Arc::new(InMemoryStationSource::new());
    let sink = Arc::new(RecordingSink::new());
    let cache = MergeCache::new(source.clone(), sink.clone());
    (source, sink, cache)
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_loads_all_origins() {
    let (source, _, cache) = setup();
    source.set_stations("merano", vec![station("me:1", "merano", &[])]);
    source.set_stations("bolzano", vec![station("bz:1", "bolzano", &[])]);

    let count = cache.refresh(&origins()).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().refreshes, 1);
}

#[tokio::test]
async fn test_refresh_replaces_wholesale() {
    let (source, _, cache) = setup();
    source.set_stations("merano", vec![station("me:1", "merano", &[])]);
    cache.refresh(&origins()).await.unwrap();

    source.set_stations("merano", vec![station("me:2", "merano", &[])]);
    cache.refresh(&origins()).await.unwrap();

    assert!(cache.get("me:1").is_none());
    assert!(cache.get("me:2").is_some());
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_set() {
    let (source, _, cache) = setup();
    source.set_stations("merano", vec![station("me:1", "merano", &[])]);
    cache.refresh(&origins()).await.unwrap();

    source.set_failing(true);
    assert_error_kind!(cache.refresh(&origins()).await, "http");
    assert!(cache.get("me:1").is_some());
}

#[tokio::test]
async fn test_snapshot_is_stable_across_refresh() {
    let (source, _, cache) = setup();
    source.set_stations("merano", vec![station("me:1", "merano", &[])]);
    cache.refresh(&origins()).await.unwrap();
    let before = cache.snapshot();

    source.set_stations("merano", vec![]);
    cache.refresh(&origins()).await.unwrap();

    assert_eq!(before.len(), 1);
    assert!(cache.is_empty());
}

// ============================================================================
// MergeAndPush
// ============================================================================

#[tokio::test]
async fn test_merge_invariant() {
    let (source, sink, cache) = setup();
    source.set_stations(
        "merano",
        vec![station("A", "merano", &[("x", json!(1)), ("y", json!(2))])],
    );
    cache.refresh(&origins()).await.unwrap();

    let merged = cache
        .merge_and_push(vec![station("A", "merano", &[("y", json!(3)), ("z", json!(4))])])
        .await
        .unwrap();

    let expected = json!({"x": 1, "y": 3, "z": 4});
    assert_eq!(serde_json::to_value(&merged[0].metadata).unwrap(), expected);
    assert_eq!(
        serde_json::to_value(&cache.get("A").unwrap().metadata).unwrap(),
        expected
    );
    assert_eq!(
        serde_json::to_value(&sink.latest_station("A").unwrap().metadata).unwrap(),
        expected
    );
}

#[tokio::test]
async fn test_unknown_station_used_as_is() {
    let (_, sink, cache) = setup();
    let incoming = station("new", "bolzano", &[("k", json!("v"))]);

    cache.merge_and_push(vec![incoming.clone()]).await.unwrap();

    assert_eq!(cache.get("new").unwrap(), incoming);
    assert_eq!(sink.station_syncs(), vec![vec![incoming]]);
}

#[tokio::test]
async fn test_cross_origin_metadata_survives() {
    let (_, _, cache) = setup();
    cache
        .merge_and_push(vec![station("S", "merano", &[("capacity", json!(100))])])
        .await
        .unwrap();
    cache
        .merge_and_push(vec![station("S", "bolzano", &[("free", json!(12))])])
        .await
        .unwrap();

    let s = cache.get("S").unwrap();
    assert_eq!(s.metadata["capacity"], json!(100));
    assert_eq!(s.metadata["free"], json!(12));
    assert_eq!(s.origin, "bolzano");
}

#[tokio::test]
async fn test_duplicate_ids_in_one_batch() {
    let (_, sink, cache) = setup();
    let merged = cache
        .merge_and_push(vec![
            station("D", "merano", &[("a", json!(1))]),
            station("D", "merano", &[("b", json!(2))]),
        ])
        .await
        .unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].metadata.len(), 2);
    assert_eq!(sink.station_syncs()[0].len(), 1);
}

#[tokio::test]
async fn test_interleaved_duplicates_keep_first_seen_order() {
    let (_, _, cache) = setup();
    let merged = cache
        .merge_and_push(vec![
            station("A", "merano", &[("a", json!(1))]),
            station("B", "merano", &[("b", json!(1))]),
            station("A", "merano", &[("a", json!(2)), ("c", json!(3))]),
        ])
        .await
        .unwrap();

    let ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(merged[0].metadata["a"], json!(2));
    assert_eq!(merged[0].metadata["c"], json!(3));
}

#[tokio::test]
async fn test_upsert_failure_keeps_cache_updated() {
    let (_, sink, cache) = setup();
    sink.set_failing(true);

    let result = cache
        .merge_and_push(vec![station("F", "merano", &[("k", json!(1))])])
        .await;

    assert_error_kind!(result, "upsert_failure");
    assert_eq!(cache.get("F").unwrap().metadata["k"], json!(1));
    assert_eq!(cache.stats().upsert_failures, 1);
}

#[tokio::test]
async fn test_empty_batch_does_not_push() {
    let (_, sink, cache) = setup();
    let merged = cache.merge_and_push(vec![]).await.unwrap();
    assert!(merged.is_empty());
    assert!(sink.station_syncs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_merges_do_not_lose_updates() {
    let (_, sink, cache) = setup();
    sink.set_delay(Duration::from_millis(5));
    let cache = Arc::new(cache);

    let mut handles = Vec::new();
    for i in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let origin = if i % 2 == 0 { "merano" } else { "bolzano" };
            let key = format!("k{}", i);
            cache
                .merge_and_push(vec![station("shared", origin, &[(key.as_str(), json!(i))])])
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let shared = cache.get("shared").unwrap();
    assert_eq!(shared.metadata.len(), 16);
    assert_eq!(cache.stats().merges, 16);
}

// ============================================================================
// FullMetadataSync
// ============================================================================

fn overlay(rows: &[(&str, Option<&str>, Option<&str>)]) -> EnrichmentOverlay {
    let workbook = Workbook::decode(&encode_workbook(&parking_workbook(rows))).unwrap();
    EnrichmentOverlay::from_workbook(&workbook, "Parking", 3).unwrap()
}

#[tokio::test]
async fn test_full_metadata_sync_applies_overlay() {
    let (source, sink, cache) = setup();
    source.set_stations(
        "merano",
        vec![station("me:1", "merano", &[("capacity", json!(50))])],
    );
    source.set_stations("bolzano", vec![station("bz:1", "bolzano", &[])]);

    let count = cache
        .full_metadata_sync(&origins(), &overlay(&[("me:1", Some("Parkplatz"), Some("Parcheggio"))]))
        .await
        .unwrap();

    assert_eq!(count, 2);
    let me1 = cache.get("me:1").unwrap();
    assert_eq!(me1.metadata["name_de"], json!("Parkplatz"));
    assert_eq!(me1.metadata["capacity"], json!(50));
    assert!(cache.get("bz:1").unwrap().metadata.is_empty());
    assert_eq!(sink.station_syncs()[0].len(), 2);
    assert_eq!(cache.stats().metadata_syncs, 1);
}

#[tokio::test]
async fn test_enrichment_survives_later_merges() {
    let (source, _, cache) = setup();
    source.set_stations("merano", vec![station("me:1", "merano", &[])]);
    cache
        .full_metadata_sync(&origins(), &overlay(&[("me:1", Some("Parkplatz"), None)]))
        .await
        .unwrap();

    cache
        .merge_and_push(vec![station("me:1", "merano", &[("free", json!(3))])])
        .await
        .unwrap();

    let me1 = cache.get("me:1").unwrap();
    assert_eq!(me1.metadata["name_de"], json!("Parkplatz"));
    assert_eq!(me1.metadata["free"], json!(3));
}

#[tokio::test]
async fn test_missing_sheet_leaves_cache_untouched() {
    let (source, sink, cache) = setup();
    source.set_stations("merano", vec![station("me:1", "merano", &[])]);
    cache.refresh(&origins()).await.unwrap();
    let before = cache.snapshot();

    let workbook = Workbook::decode(&encode_workbook(&json!({"sheets": []}))).unwrap();
    assert_error_kind!(
        EnrichmentOverlay::from_workbook(&workbook, "Parking", 3),
        "enrichment_source_missing"
    );

    assert_eq!(*cache.snapshot(), *before);
    assert!(sink.station_syncs().is_empty());
}

#[tokio::test]
async fn test_full_metadata_sync_upsert_failure_is_reported() {
    let (source, sink, cache) = setup();
    source.set_stations("merano", vec![station("me:1", "merano", &[])]);
    sink.set_failing(true);

    let result = cache
        .full_metadata_sync(&origins(), &overlay(&[("me:1", Some("P"), None)]))
        .await;

    assert_error_kind!(result, "upsert_failure");
    assert_eq!(cache.get("me:1").unwrap().metadata["name_de"], json!("P"));
}

// ============================================================================
// Properties
// ============================================================================

fn arb_metadata() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec(("[a-e]", 0i64..100), 0..6)
}

fn arb_batch() -> impl Strategy<Value = Vec<StationRecord>> {
    prop::collection::vec(("[A-D]", arb_metadata()), 0..8).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(id, pairs)| {
                pairs.into_iter().fold(
                    StationRecord::new(id.clone(), id, "merano"),
                    |s, (k, v)| s.with_metadata(k, v),
                )
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn merge_is_idempotent(initial in arb_batch(), batch in arb_batch()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (source, _, cache) = setup();
            source.set_stations("merano", initial);
            cache.refresh(&origins()).await.unwrap();

            cache.merge_and_push(batch.clone()).await.unwrap();
            let first = cache.snapshot();
            cache.merge_and_push(batch).await.unwrap();
            let second = cache.snapshot();

            prop_assert_eq!(&*first, &*second);
            Ok(())
        })?;
    }

    #[test]
    fn cached_keys_survive_merge(initial in arb_batch(), batch in arb_batch()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (source, _, cache) = setup();
            source.set_stations("merano", initial);
            cache.refresh(&origins()).await.unwrap();
            let before = cache.snapshot();

            cache.merge_and_push(batch).await.unwrap();

            for old in before.iter() {
                let now = cache.get(&old.id).unwrap();
                for key in old.metadata.keys() {
                    prop_assert!(now.metadata.contains_key(key));
                }
            }
            Ok(())
        })?;
    }
}

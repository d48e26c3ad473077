//! Load stage tests against the point store: batching, bounded concurrency,
//! fallback and the failure manifest

use crate::common::generation_rows;
use async_trait::async_trait;
use gridload_core::config::LoadConfig;
use gridload_core::error::{GridloadError, Result};
use gridload_core::load::{DatasetMapping, LoadRequest, LoadStage, MappingTable};
use gridload_core::models::{CanonicalRow, DatasetType, TimeSeriesPoint};
use gridload_core::resilience::RetryPolicy;
use gridload_core::store::{BatchAck, InMemoryPointStore, PointQuery, PointStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(batch_size: usize, concurrency: usize) -> LoadConfig {
    LoadConfig {
        batch_size,
        concurrency,
        batch_retry: RetryPolicy::load_batch(),
        ..LoadConfig::default()
    }
}

/// Store that holds each batch for a while and records peak concurrency
#[derive(Debug, Default)]
struct SlowPointStore {
    inner: InMemoryPointStore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl PointStore for SlowPointStore {
    async fn write_batch(&self, points: &[TimeSeriesPoint]) -> Result<BatchAck> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let ack = self.inner.write_batch(points).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ack
    }

    async fn probe(&self) -> Result<()> {
        self.inner.probe().await
    }

    async fn query(&self, query: &PointQuery) -> Result<Vec<TimeSeriesPoint>> {
        self.inner.query(query).await
    }

    async fn delete(&self, query: &PointQuery) -> Result<usize> {
        self.inner.delete(query).await
    }
}

#[tokio::test]
async fn test_twenty_five_hundred_rows_in_thousand_point_batches() {
    let store = Arc::new(InMemoryPointStore::new());
    let stage = LoadStage::new(store.clone(), config(1000, 1));

    let report = stage
        .run(LoadRequest::new("exec-1", DatasetType::Generation, generation_rows(2500)))
        .await
        .unwrap();

    assert_eq!(store.batch_sizes(), vec![1000, 1000, 500]);
    assert_eq!(report.batches, 3);
    assert_eq!(report.points_submitted, 2500);
    assert_eq!(report.points_written, 2500);
    assert_eq!(report.fallback_batches, 0);
    assert_eq!(store.point_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_batches_are_bounded() {
    let store = Arc::new(SlowPointStore::default());
    let stage = LoadStage::new(store.clone(), config(10, 3));

    let report = stage
        .run(LoadRequest::new("exec-2", DatasetType::Generation, generation_rows(200)))
        .await
        .unwrap();

    assert_eq!(report.batches, 20);
    assert_eq!(report.points_written, 200);
    let peak = store.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak}");
    assert!(peak > 1, "batches never overlapped");
}

#[tokio::test(start_paused = true)]
async fn test_throttled_batch_recovers_without_fallback() {
    let store = Arc::new(InMemoryPointStore::new());
    store.fail_next_batches(2);
    let stage = LoadStage::new(store.clone(), config(50, 1));

    let report = stage
        .run(LoadRequest::new("exec-3", DatasetType::Generation, generation_rows(100)))
        .await
        .unwrap();

    assert_eq!(report.points_written, 100);
    assert_eq!(report.fallback_batches, 0);
    assert!(!report.is_partial());
    // first batch took three calls, second one
    assert_eq!(store.batch_sizes(), vec![50, 50, 50, 50]);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_batches_are_salvaged_point_by_point() {
    let store = Arc::new(InMemoryPointStore::new());
    store.fail_next_batches(usize::MAX);
    let stage = LoadStage::new(store.clone(), config(40, 2));

    let report = stage
        .run(LoadRequest::new("exec-4", DatasetType::Generation, generation_rows(100)))
        .await
        .unwrap();

    assert_eq!(report.fallback_batches, 3);
    assert_eq!(report.points_written, 100);
    assert!(report.manifest.is_empty());
    assert_eq!(store.point_writes(), 100);
    assert_eq!(store.len(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_outage_without_health_check_fills_manifest() {
    let store = Arc::new(InMemoryPointStore::new());
    store.set_available(false);
    let stage = LoadStage::new(
        store.clone(),
        LoadConfig {
            health_check_enabled: false,
            ..config(25, 2)
        },
    );

    let report = stage
        .run(LoadRequest::new("exec-5", DatasetType::Generation, generation_rows(60)))
        .await
        .unwrap();

    assert_eq!(report.points_written, 0);
    assert_eq!(report.manifest.failed_points.len(), 60);
    assert!(report.is_balanced());
    assert!(report
        .manifest
        .failed_points
        .iter()
        .all(|p| p.measurement == "energy_generation"));
    let batch_indexes: Vec<usize> = report
        .manifest
        .failed_points
        .iter()
        .map(|p| p.batch_index)
        .collect();
    assert_eq!(batch_indexes.first(), Some(&0));
    assert_eq!(batch_indexes.last(), Some(&2));
}

#[tokio::test]
async fn test_health_check_reports_store_unavailable() {
    let store = Arc::new(InMemoryPointStore::new());
    store.set_available(false);
    let stage = LoadStage::new(store.clone(), config(100, 1));

    let error = stage
        .run(LoadRequest::new("exec-6", DatasetType::Generation, generation_rows(5)))
        .await
        .unwrap_err();

    assert!(matches!(error, GridloadError::StoreUnavailable { .. }));
    assert!(store.batch_sizes().is_empty());
}

#[tokio::test]
async fn test_rejected_rows_and_failed_points_share_one_manifest() {
    let store = Arc::new(InMemoryPointStore::new());
    store.reject_tag("plant_id", "P-1");
    let stage = LoadStage::new(
        store.clone(),
        LoadConfig {
            batch_retry: RetryPolicy::no_retry(),
            ..config(10, 2)
        },
    );

    let mut rows = generation_rows(20);
    rows.push(CanonicalRow::new().with("plant_id", "P-9").with("mw", 1.0));
    rows.push(
        CanonicalRow::new()
            .with("timestamp", "not a time")
            .with("mw", 2.0),
    );

    let report = stage
        .run(LoadRequest::new("exec-7", DatasetType::Generation, rows))
        .await
        .unwrap();

    assert_eq!(report.rows_received, 22);
    assert_eq!(report.points_submitted, 20);
    assert_eq!(report.points_written, 16);
    assert_eq!(report.manifest.failed_points.len(), 4);
    let rejected: Vec<usize> = report
        .manifest
        .rejected_rows
        .iter()
        .map(|r| r.row_index)
        .collect();
    assert_eq!(rejected, vec![20, 21]);
    assert!(report.is_balanced());
}

#[tokio::test]
async fn test_custom_mapping_and_extra_tags() {
    let store = Arc::new(InMemoryPointStore::new());
    let mappings = MappingTable::default().with_mapping(
        DatasetType::General,
        DatasetMapping::new("spot_prices", &["market"])
            .with_timestamp_column("interval_start")
            .with_field_columns(&["price"]),
    );
    let stage = LoadStage::new(store.clone(), config(100, 1)).with_mappings(mappings);

    let rows = vec![
        CanonicalRow::new()
            .with("interval_start", "2024-03-01 00:00:00")
            .with("market", "ERCOT")
            .with("price", 41.5)
            .with("note", "ignored"),
        CanonicalRow::new()
            .with("interval_start", "2024-03-01 00:05:00")
            .with("market", "ERCOT")
            .with("price", 43.0),
    ];
    let request = LoadRequest::new("exec-8", DatasetType::General, rows)
        .with_source_file("prices/march.csv")
        .with_tag("batch", "nightly");

    let report = stage.run(request).await.unwrap();
    assert_eq!(report.points_written, 2);

    let stored = store
        .query(
            &PointQuery::measurement("spot_prices")
                .with_tag("market", "ERCOT")
                .with_tag("source_file", "prices/march.csv")
                .with_tag("batch", "nightly")
                .with_tag("dataset_type", "general"),
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|p| p.fields.len() == 1));
}

#[tokio::test]
async fn test_empty_request_writes_nothing() {
    let store = Arc::new(InMemoryPointStore::new());
    let report = LoadStage::new(store.clone(), config(100, 4))
        .run(LoadRequest::new("exec-9", DatasetType::Consumption, Vec::new()))
        .await
        .unwrap();

    assert_eq!(report.batches, 0);
    assert_eq!(report.points_written, 0);
    assert!(store.batch_sizes().is_empty());
}

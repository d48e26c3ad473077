//! Shared builders and harnesses

use anyhow::Context;
use super::doubles::{CountingIndexer, RecordingNotifier, ScriptedProcessingExecutor, StaticRowReader};
use chrono::{DateTime, Duration, TimeZone, Utc};
use gridload_core::config::GridloadConfig;
use gridload_core::migration::{
    InMemoryJobStore, InMemorySource, InMemoryStagingArea, MigrationDependencies,
    MigrationOrchestrator,
};
use gridload_core::models::{
    CanonicalRow, DatasetType, JobStatusReport, MigrationConfig, ObjectCreatedEvent, SourceSelector,
    TargetSelector, TimeRange,
};
use gridload_core::orchestration::{WorkflowDependencies, WorkflowOrchestrator};
use gridload_core::resilience::RetryPolicy;
use gridload_core::store::InMemoryPointStore;
use serde_json::{json, Value};
use std::sync::Arc;

pub const MB: u64 = 1024 * 1024;

pub fn january_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn january() -> TimeRange {
    TimeRange::new(january_start(), Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap())
}

/// Generation rows one minute apart, starting 2024-01-01
pub fn generation_rows(n: usize) -> Vec<CanonicalRow> {
    (0..n)
        .map(|i| {
            CanonicalRow::new()
                .with(
                    "timestamp",
                    (january_start() + Duration::minutes(i as i64)).to_rfc3339(),
                )
                .with("plant_id", format!("P-{}", i % 5))
                .with("fuel_type", "solar")
                .with("region", "west")
                .with("mw", 10.0 + i as f64)
        })
        .collect()
}

pub fn raw_event(key: &str, size: u64) -> Value {
    json!({
        "bucket": "raw-energy",
        "key": key,
        "size": size,
        "eTag": format!("etag-{key}"),
        "time": "2024-02-01T12:00:00Z"
    })
}

pub fn object_event(key: &str, size: u64) -> ObjectCreatedEvent {
    serde_json::from_value(raw_event(key, size)).unwrap()
}

/// Defaults, with migration retries shortened so failure paths stay quick
pub fn test_config() -> GridloadConfig {
    let mut config = GridloadConfig::default();
    config.migration.export_retry =
        RetryPolicy::fast_stage().with_base_interval(std::time::Duration::from_millis(1));
    config
}

pub fn migration_request(job_id: &str, batch_size: usize) -> MigrationConfig {
    MigrationConfig::new(
        "january generation backfill",
        SourceSelector {
            database: "legacy".to_string(),
            table: "generation".to_string(),
            time_range: january(),
        },
        TargetSelector {
            bucket: "energy".to_string(),
            measurement: "energy_generation".to_string(),
        },
        batch_size,
    )
    .with_job_id(job_id)
    .with_dataset_type(DatasetType::Generation)
}

pub struct PipelineHarness {
    pub orchestrator: WorkflowOrchestrator,
    pub executor: Arc<ScriptedProcessingExecutor>,
    pub points: Arc<InMemoryPointStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub indexer: Arc<CountingIndexer>,
}

impl PipelineHarness {
    pub fn new(executor: ScriptedProcessingExecutor, rows: Vec<CanonicalRow>) -> Self {
        Self::with_config(test_config(), executor, rows)
    }

    pub fn with_config(
        config: GridloadConfig,
        executor: ScriptedProcessingExecutor,
        rows: Vec<CanonicalRow>,
    ) -> Self {
        Self::with_notifier(config, executor, rows, Arc::new(RecordingNotifier::new()))
    }

    pub fn with_notifier(
        config: GridloadConfig,
        executor: ScriptedProcessingExecutor,
        rows: Vec<CanonicalRow>,
        notifier: Arc<RecordingNotifier>,
    ) -> Self {
        let executor = Arc::new(executor);
        let points = Arc::new(InMemoryPointStore::new());
        let indexer = Arc::new(CountingIndexer::default());

        let deps = WorkflowDependencies::new(
            executor.clone(),
            Arc::new(StaticRowReader::new(rows)),
            points.clone(),
        )
        .with_notifier(notifier.clone())
        .with_index_executor(indexer.clone());

        Self {
            orchestrator: WorkflowOrchestrator::new(&config, deps),
            executor,
            points,
            notifier,
            indexer,
        }
    }
}

pub struct MigrationHarness {
    pub orchestrator: MigrationOrchestrator,
    pub job_store: Arc<InMemoryJobStore>,
    pub source: Arc<InMemorySource>,
    pub staging: Arc<InMemoryStagingArea>,
    pub points: Arc<InMemoryPointStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl MigrationHarness {
    pub fn new(source_rows: usize) -> Self {
        Self::with_config(test_config(), source_rows)
    }

    pub fn with_config(config: GridloadConfig, source_rows: usize) -> Self {
        let job_store = Arc::new(InMemoryJobStore::new());
        let source = Arc::new(
            InMemorySource::new().with_table("legacy", "generation", generation_rows(source_rows)),
        );
        let staging = Arc::new(InMemoryStagingArea::new());
        let points = Arc::new(InMemoryPointStore::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let deps = MigrationDependencies::new(
            job_store.clone(),
            source.clone(),
            staging.clone(),
            points.clone(),
        )
        .with_notifier(notifier.clone());

        Self {
            orchestrator: MigrationOrchestrator::new(&config, deps),
            job_store,
            source,
            staging,
            points,
            notifier,
        }
    }
}

/// Poll a job's durable status until it is terminal
///
/// For jobs driven by a task on another instance, where `wait` has no
/// handle to join.
pub async fn wait_for_terminal_status(
    orchestrator: &MigrationOrchestrator,
    job_id: &str,
    max_wait: std::time::Duration,
) -> anyhow::Result<JobStatusReport> {
    let started = std::time::Instant::now();
    while started.elapsed() < max_wait {
        let report = orchestrator
            .status(job_id)
            .await
            .with_context(|| format!("status of {job_id}"))?;
        if report.status.is_terminal() {
            return Ok(report);
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    Err(anyhow::anyhow!("job {job_id} not terminal within {max_wait:?}"))
}

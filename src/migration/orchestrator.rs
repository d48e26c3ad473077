//! # Migration Orchestrator
//!
//! Runs historical backfill jobs from a source backend into the target
//! point store:
//!
//! ```text
//! Pending → Exporting → (Validating)? → Loading → Completed
//!              │             │             │
//!              └──── Failed ─┴─────────────┘ → RollingBack → RolledBack
//! ```
//!
//! `start` validates the request, creates the job record with a conditional
//! write and spawns the job task; it never waits for the job itself. Every
//! status change goes through [`MigrationStateMachine`], i.e. a
//! compare-and-set against the [`JobStore`], so a task that loses a race
//! with another orchestrator instance stops without touching the job.
//!
//! Status CAS does not cover the stretches between transitions, so a job
//! task also holds a run claim in the job store. `start` and `resume` take
//! it before spawning, the task renews it at every page, chunk and batch
//! boundary, and a task that finds its claim taken over stops as if
//! superseded. Another instance can only resume a job once the holder's
//! lease has lapsed.
//!
//! Cancellation is a durable flag checked between export pages, staged
//! chunks and load batches; in-flight calls always finish first.

use super::job_store::{CreateOutcome, JobStore};
use super::source::SourceReader;
use super::staging::StagingArea;
use super::validator::ExportValidator;
use crate::config::{GridloadConfig, MigrationSettings};
use crate::constants::{events as system_events, system};
use crate::error::{GridloadError, Result};
use crate::events::{EventPublisher, NotificationEvent, NotificationKind, Notifier, PublisherNotifier};
use crate::load::{FailureManifest, LoadReport, LoadStage};
use crate::logging::{log_error, log_migration_operation};
use crate::models::{
    CancelResponse, Checkpoint, JobStatusReport, MigrationConfig, MigrationJob, StartResponse,
    TimeSeriesPoint,
};
use crate::orchestration::{ErrorClassifier, ErrorContext, StandardErrorClassifier};
use crate::resilience::execute_with_retry;
use crate::state_machine::{MigrationEvent, MigrationStateMachine, MigrationStatus, StateMachineError};
use crate::store::{PointQuery, PointStore};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External collaborators of the migration orchestrator
#[derive(Clone)]
pub struct MigrationDependencies {
    pub job_store: Arc<dyn JobStore>,
    pub source: Arc<dyn SourceReader>,
    pub staging: Arc<dyn StagingArea>,
    pub point_store: Arc<dyn PointStore>,
    pub notifier: Arc<dyn Notifier>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub event_publisher: EventPublisher,
}

impl MigrationDependencies {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        source: Arc<dyn SourceReader>,
        staging: Arc<dyn StagingArea>,
        point_store: Arc<dyn PointStore>,
    ) -> Self {
        let event_publisher = EventPublisher::default();
        Self {
            job_store,
            source,
            staging,
            point_store,
            notifier: Arc::new(PublisherNotifier::new(event_publisher.clone())),
            classifier: Arc::new(StandardErrorClassifier::new()),
            event_publisher,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the publisher; the default notifier follows it
    pub fn with_event_publisher(mut self, event_publisher: EventPublisher) -> Self {
        self.notifier = Arc::new(PublisherNotifier::new(event_publisher.clone()));
        self.event_publisher = event_publisher;
        self
    }
}

impl std::fmt::Debug for MigrationDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDependencies")
            .field("classifier", &self.classifier.classifier_name())
            .field("event_publisher", &self.event_publisher)
            .finish_non_exhaustive()
    }
}

/// Why a job task stopped before completing
#[derive(Debug)]
enum JobInterrupt {
    /// A cancel request was observed while the job was in `status`
    Cancelled {
        status: MigrationStatus,
        rollback: bool,
    },
    /// A stage failed while the job was in `status`
    Failed {
        status: MigrationStatus,
        error: GridloadError,
        manifest: Option<FailureManifest>,
    },
    /// Another writer moved the job; this task must not touch it further
    Superseded { reason: String },
}

impl JobInterrupt {
    fn failed(status: MigrationStatus) -> impl FnOnce(GridloadError) -> Self {
        move |error| Self::Failed {
            status,
            error,
            manifest: None,
        }
    }
}

type StepResult<T> = std::result::Result<T, JobInterrupt>;

/// Shared state of the job tasks
#[derive(Debug)]
struct MigrationRuntime {
    /// Owner id for this instance's job claims
    instance_id: String,
    deps: MigrationDependencies,
    settings: MigrationSettings,
    load_stage: LoadStage,
    validator: ExportValidator,
}

/// Control API for migration jobs
#[derive(Debug, Clone)]
pub struct MigrationOrchestrator {
    runtime: Arc<MigrationRuntime>,
    tasks: Arc<DashMap<String, JoinHandle<()>>>,
}

impl MigrationOrchestrator {
    pub fn new(config: &GridloadConfig, deps: MigrationDependencies) -> Self {
        let load_stage = LoadStage::new(Arc::clone(&deps.point_store), config.load.clone());
        let validator = ExportValidator::new(
            config.migration.validation_tolerance,
            config.migration.validation_sample_size,
        );
        Self {
            runtime: Arc::new(MigrationRuntime {
                instance_id: Uuid::new_v4().to_string(),
                deps,
                settings: config.migration.clone(),
                load_stage,
                validator,
            }),
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.runtime.deps.job_store
    }

    pub fn event_publisher(&self) -> &EventPublisher {
        &self.runtime.deps.event_publisher
    }

    /// Owner id this instance claims jobs under
    pub fn instance_id(&self) -> &str {
        &self.runtime.instance_id
    }

    /// Validate the request, create the job and begin exporting in the background
    pub async fn start(&self, config: MigrationConfig) -> Result<StartResponse> {
        let (source, target) = config.validate()?;
        let job_id = config
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let job = MigrationJob::pending(&job_id, &config, source, target);

        match self.runtime.deps.job_store.create_if_absent(&job).await? {
            CreateOutcome::Created => {}
            CreateOutcome::Existing(existing) if existing.status.is_terminal() => {
                return Err(GridloadError::JobAlreadyExists {
                    job_id,
                    status: existing.status.to_string(),
                });
            }
            CreateOutcome::Existing(_) => {
                warn!(job_id = %job_id, "⚠️ Rejected start for job with a non-terminal record");
                return Err(GridloadError::JobAlreadyRunning { job_id });
            }
        }

        self.runtime
            .deps
            .event_publisher
            .publish(
                system_events::MIGRATION_JOB_CREATED,
                json!({ "job_id": job_id, "name": job.name, "batch_size": job.batch_size }),
            )
            .await;
        log_migration_operation("start", &job_id, "pending", Some(0.0), Some(&job.name));

        // Only a resume from another instance can get in between create and claim
        if self.runtime.claim(&job_id).await? {
            self.spawn(&job_id);
        } else {
            info!(job_id = %job_id, "📌 New job already claimed by another instance");
        }
        Ok(StartResponse { job_id })
    }

    /// Latest durable status of a job
    pub async fn status(&self, job_id: &str) -> Result<JobStatusReport> {
        let job = self.require_job(job_id).await?;
        let mut report = job.status_report();
        report.rollback_pending = self.runtime.rollback_pending(&job).await?;
        Ok(report)
    }

    async fn require_job(&self, job_id: &str) -> Result<MigrationJob> {
        self.runtime
            .deps
            .job_store
            .get(job_id)
            .await?
            .ok_or_else(|| GridloadError::not_found("migration job", job_id))
    }

    /// Request cancellation; data already exported or loaded stays in place
    pub async fn cancel(&self, job_id: &str) -> Result<CancelResponse> {
        self.request_cancellation(job_id, false).await
    }

    /// Request cancellation followed by rollback of everything the job wrote
    pub async fn cancel_with_rollback(&self, job_id: &str) -> Result<CancelResponse> {
        self.request_cancellation(job_id, true).await
    }

    async fn request_cancellation(&self, job_id: &str, rollback: bool) -> Result<CancelResponse> {
        let accepted = self
            .runtime
            .deps
            .job_store
            .request_cancellation(job_id, rollback)
            .await?;
        log_migration_operation(
            "cancel",
            job_id,
            if accepted { "requested" } else { "rejected" },
            None,
            rollback.then_some("with rollback"),
        );
        Ok(CancelResponse { accepted })
    }

    /// Re-drive a job whose task is gone, e.g. after a process restart
    ///
    /// Export continues from the last checkpoint; loading starts over from
    /// the first staged chunk, which is safe because point writes are
    /// idempotent. A failed job whose rollback never started gets its
    /// rollback run. Fails with `JobAlreadyRunning` while any instance holds
    /// a live claim on the job.
    pub async fn resume(&self, job_id: &str) -> Result<StartResponse> {
        let job = self.require_job(job_id).await?;

        if job.status.is_terminal() && !self.runtime.rollback_pending(&job).await? {
            return Err(GridloadError::JobAlreadyExists {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }
        if self.is_running(job_id) || !self.runtime.claim(job_id).await? {
            return Err(GridloadError::JobAlreadyRunning {
                job_id: job_id.to_string(),
            });
        }

        log_migration_operation(
            "resume",
            job_id,
            job.status.as_str(),
            Some(job.progress_percentage),
            None,
        );
        self.spawn(job_id);
        Ok(StartResponse {
            job_id: job_id.to_string(),
        })
    }

    /// Whether this instance has a live task for the job
    pub fn is_running(&self, job_id: &str) -> bool {
        self.tasks
            .get(job_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for this instance's task for the job, then report its status
    pub async fn wait(&self, job_id: &str) -> Result<JobStatusReport> {
        if let Some((_, handle)) = self.tasks.remove(job_id) {
            if let Err(join_error) = handle.await {
                log_error(
                    "migration_orchestrator",
                    "wait",
                    &join_error.to_string(),
                    Some(job_id),
                );
            }
        }
        self.status(job_id).await
    }

    fn spawn(&self, job_id: &str) {
        let runtime = Arc::clone(&self.runtime);
        let task_job_id = job_id.to_string();
        let handle = tokio::spawn(async move { runtime.run_job(&task_job_id).await });
        self.tasks.insert(job_id.to_string(), handle);
    }
}

impl MigrationRuntime {
    async fn claim(&self, job_id: &str) -> Result<bool> {
        self.deps
            .job_store
            .try_claim(job_id, &self.instance_id, self.settings.claim_lease())
            .await
    }

    /// Failed with rollback enabled, and the failure did not come from a rollback
    async fn rollback_pending(&self, job: &MigrationJob) -> Result<bool> {
        if job.status != MigrationStatus::Failed || !job.rollback_enabled {
            return Ok(false);
        }
        let transitions = self.deps.job_store.transitions(&job.job_id).await?;
        Ok(transitions
            .last()
            .is_some_and(|t| t.from_status != Some(MigrationStatus::RollingBack)))
    }

    async fn run_job(&self, job_id: &str) {
        self.run_claimed(job_id).await;
        if let Err(error) = self.deps.job_store.release_claim(job_id, &self.instance_id).await {
            warn!(job_id, error = %error, "⚠️ Could not release job claim, it lapses with its lease");
        }
    }

    async fn run_claimed(&self, job_id: &str) {
        let job = match self.deps.job_store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                log_error("migration_orchestrator", "run_job", "job record not found", Some(job_id));
                return;
            }
            Err(error) => {
                log_error("migration_orchestrator", "run_job", &error.to_string(), Some(job_id));
                return;
            }
        };

        let machine = MigrationStateMachine::new(
            job_id,
            Arc::clone(&self.deps.job_store),
            self.deps.event_publisher.clone(),
        );

        match job.status {
            // A job that died mid-rollback only needs the rollback finished
            MigrationStatus::RollingBack => {
                self.rollback(&machine, &job).await;
                return;
            }
            // Failure recorded but its rollback never began
            MigrationStatus::Failed => {
                if job.rollback_enabled {
                    self.start_rollback(&machine, &job).await;
                }
                return;
            }
            _ => {}
        }

        match self.drive(&machine, &job).await {
            Ok(()) => {
                log_migration_operation("run", job_id, "completed", Some(100.0), None);
            }
            Err(JobInterrupt::Cancelled { status, rollback }) => {
                self.cancel_job(&machine, &job, status, rollback).await;
            }
            Err(JobInterrupt::Failed {
                status,
                error,
                manifest,
            }) => {
                self.fail_job(&machine, &job, status, error, manifest).await;
            }
            Err(JobInterrupt::Superseded { reason }) => {
                warn!(job_id, reason = %reason, "⚠️ Migration job moved by another writer, stopping");
            }
        }
    }

    async fn drive(&self, machine: &MigrationStateMachine, job: &MigrationJob) -> StepResult<()> {
        let mut status = job.status;

        if status == MigrationStatus::Pending {
            self.check_cancellation(job, status).await?;
            status = self.advance(machine, status, MigrationEvent::StartExport).await?;
        }

        if status == MigrationStatus::Exporting {
            self.export(job).await?;
            self.check_cancellation(job, status).await?;
            let next = if job.validation_enabled {
                MigrationEvent::StartValidation
            } else {
                MigrationEvent::StartLoading
            };
            status = self.advance(machine, status, next).await?;
        }

        if status == MigrationStatus::Validating {
            self.check_cancellation(job, status).await?;
            self.validate(job).await?;
            status = self
                .advance(machine, status, MigrationEvent::StartLoading)
                .await?;
        }

        if status != MigrationStatus::Loading {
            return Err(JobInterrupt::Superseded {
                reason: format!("job is {status}, nothing to drive"),
            });
        }

        self.load(job).await?;
        self.advance(machine, status, MigrationEvent::Complete).await?;

        // Staged data is only kept for resume and rollback
        if let Err(error) = self.deps.staging.purge(&job.job_id).await {
            warn!(job_id = %job.job_id, error = %error, "⚠️ Could not purge staged export");
        }
        Ok(())
    }

    async fn advance(
        &self,
        machine: &MigrationStateMachine,
        from: MigrationStatus,
        event: MigrationEvent,
    ) -> StepResult<MigrationStatus> {
        match machine.transition_from(from, event).await {
            Ok(next) => {
                log_migration_operation("transition", machine.job_id(), next.as_str(), None, None);
                Ok(next)
            }
            Err(StateMachineError::ConcurrentModification { actual, .. }) => {
                Err(JobInterrupt::Superseded {
                    reason: format!("expected {from}, found {actual}"),
                })
            }
            Err(other) => Err(JobInterrupt::failed(from)(other.into())),
        }
    }

    /// Renew the run claim; a lost claim means another instance owns the job now
    async fn hold_claim(&self, job: &MigrationJob, status: MigrationStatus) -> StepResult<()> {
        let renewed = self
            .deps
            .job_store
            .renew_claim(&job.job_id, &self.instance_id, self.settings.claim_lease())
            .await;
        match renewed {
            Ok(true) => Ok(()),
            Ok(false) => Err(JobInterrupt::Superseded {
                reason: format!("claim lost while {status}"),
            }),
            Err(error) => Err(JobInterrupt::failed(status)(error)),
        }
    }

    async fn check_cancellation(&self, job: &MigrationJob, status: MigrationStatus) -> StepResult<()> {
        self.hold_claim(job, status).await?;
        match self.deps.job_store.cancellation(&job.job_id).await {
            Ok(Some(request)) => {
                info!(job_id = %job.job_id, status = %status, rollback = request.rollback, "🛑 Cancel request observed");
                Err(JobInterrupt::Cancelled {
                    status,
                    rollback: request.rollback,
                })
            }
            Ok(None) => Ok(()),
            Err(error) => Err(JobInterrupt::failed(status)(error)),
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        execute_with_retry(&self.settings.export_retry, operation_name, operation)
            .await
            .result
    }

    async fn report_progress(&self, job_id: &str, percentage: f64) {
        if let Err(error) = self.deps.job_store.update_progress(job_id, percentage).await {
            warn!(job_id, error = %error, "⚠️ Could not record migration progress");
            return;
        }
        self.deps
            .event_publisher
            .publish(
                system_events::MIGRATION_JOB_PROGRESS,
                json!({ "job_id": job_id, "progress_percentage": percentage }),
            )
            .await;
    }

    async fn require_checkpoint(&self, job: &MigrationJob, status: MigrationStatus) -> StepResult<Checkpoint> {
        let staging = self.deps.staging.as_ref();
        self.with_retry("load_checkpoint", |_| staging.load_checkpoint(&job.job_id))
            .await
            .map_err(JobInterrupt::failed(status))?
            .ok_or_else(|| {
                JobInterrupt::failed(status)(GridloadError::Staging(format!(
                    "no export checkpoint for job {}",
                    job.job_id
                )))
            })
    }

    async fn export(&self, job: &MigrationJob) -> StepResult<Checkpoint> {
        let status = MigrationStatus::Exporting;
        let job_id = job.job_id.as_str();
        let selector = &job.source_selector;
        let source = self.deps.source.as_ref();
        let staging = self.deps.staging.as_ref();

        let mut checkpoint = self
            .with_retry("load_checkpoint", |_| staging.load_checkpoint(job_id))
            .await
            .map_err(JobInterrupt::failed(status))?
            .unwrap_or_else(|| Checkpoint::initial(job_id));
        if checkpoint.export_complete {
            return Ok(checkpoint);
        }
        if checkpoint.chunks_written > 0 {
            info!(
                job_id,
                offset = checkpoint.last_exported_offset,
                chunks = checkpoint.chunks_written,
                "♻️ Resuming export from checkpoint"
            );
        }

        let estimate = match source.estimate_count(selector).await {
            Ok(estimate) => estimate,
            Err(error) => {
                warn!(job_id, error = %error, "⚠️ Record count estimate unavailable, progress will jump");
                0
            }
        };
        let page_size = self.settings.export_page_size.max(1);

        loop {
            self.check_cancellation(job, status).await?;

            let offset = checkpoint.last_exported_offset;
            let page = self
                .with_retry("read_source_page", |_| source.read_page(selector, offset, page_size))
                .await
                .map_err(JobInterrupt::failed(status))?;
            let read = page.records.len() as u64;
            self.hold_claim(job, status).await?;

            if read > 0 {
                let index = checkpoint.chunks_written;
                let records = &page.records;
                self.with_retry("write_staging_chunk", |_| {
                    staging.write_chunk(job_id, index, records)
                })
                .await
                .map_err(JobInterrupt::failed(status))?;
                checkpoint.chunks_written += 1;
                checkpoint.records_exported += read;
            }

            checkpoint.last_exported_offset = page.next_offset.unwrap_or(offset + read);
            checkpoint.export_complete = page.next_offset.is_none() || read == 0;
            checkpoint.updated_at = Utc::now();
            self.hold_claim(job, status).await?;
            let snapshot = &checkpoint;
            self.with_retry("save_checkpoint", |_| staging.save_checkpoint(snapshot))
                .await
                .map_err(JobInterrupt::failed(status))?;

            let fraction = if checkpoint.export_complete {
                1.0
            } else if estimate == 0 {
                0.0
            } else {
                (checkpoint.records_exported as f64 / estimate as f64).min(1.0)
            };
            self.report_progress(job_id, system::EXPORT_PROGRESS_SHARE * fraction)
                .await;

            debug!(
                job_id,
                offset = checkpoint.last_exported_offset,
                chunks = checkpoint.chunks_written,
                "Export page staged"
            );
            if checkpoint.export_complete {
                break;
            }
        }

        info!(
            job_id,
            records = checkpoint.records_exported,
            chunks = checkpoint.chunks_written,
            "📤 Export finished"
        );
        Ok(checkpoint)
    }

    async fn validate(&self, job: &MigrationJob) -> StepResult<()> {
        let status = MigrationStatus::Validating;
        let checkpoint = self.require_checkpoint(job, status).await?;
        let source = self.deps.source.as_ref();
        let staging = self.deps.staging.as_ref();

        let report = self
            .with_retry("validate_export", |_| {
                self.validator
                    .validate(&job.source_selector, source, staging, &checkpoint)
            })
            .await
            .map_err(JobInterrupt::failed(status))?;

        if let Some(reason) = report.failure_reason() {
            return Err(JobInterrupt::failed(status)(GridloadError::validation(reason)));
        }
        self.report_progress(&job.job_id, system::EXPORT_PROGRESS_SHARE)
            .await;
        Ok(())
    }

    async fn load(&self, job: &MigrationJob) -> StepResult<()> {
        let status = MigrationStatus::Loading;
        let job_id = job.job_id.as_str();
        let staging = self.deps.staging.as_ref();

        if self.load_stage.config().health_check_enabled {
            self.with_retry("target_health_check", |_| self.load_stage.health_check())
                .await
                .map_err(JobInterrupt::failed(status))?;
        }

        let checkpoint = self.require_checkpoint(job, status).await?;
        let mut extra_tags = BTreeMap::new();
        extra_tags.insert(self.settings.provenance_tag.clone(), job_id.to_string());

        let batch_size = job.batch_size.max(1);
        let total = checkpoint.records_exported.max(1) as f64;
        let load_share = 100.0 - system::EXPORT_PROGRESS_SHARE;

        let mut report = LoadReport::default();
        let mut pending: Vec<TimeSeriesPoint> = Vec::new();
        let mut batch_index = 0;

        // Batches span chunk boundaries so batch sizes follow the job, not the export pages
        for chunk_index in 0..checkpoint.chunks_written {
            self.check_cancellation(job, status).await?;
            let rows = self
                .with_retry("read_staging_chunk", |_| staging.read_chunk(job_id, chunk_index))
                .await
                .map_err(JobInterrupt::failed(status))?;

            let converted = self.load_stage.convert_rows(
                &rows,
                job.dataset_type,
                &extra_tags,
                report.rows_received,
            );
            report.rows_received += rows.len();
            report.manifest.rejected_rows.extend(converted.rejected);
            pending.extend(converted.points.into_iter().map(|mut point| {
                point.measurement = job.target_selector.measurement.clone();
                point
            }));

            while pending.len() >= batch_size {
                let batch: Vec<TimeSeriesPoint> = pending.drain(..batch_size).collect();
                self.write_batch(job, batch_index, &batch, &mut report).await?;
                batch_index += 1;

                // Every row becomes one point or one rejection, so this counts
                // rows flushed plus rows rejected
                let processed = report.rows_received.saturating_sub(pending.len()) as f64;
                self.report_progress(
                    job_id,
                    system::EXPORT_PROGRESS_SHARE + load_share * (processed / total).min(1.0),
                )
                .await;
            }
        }
        if !pending.is_empty() {
            self.write_batch(job, batch_index, &pending, &mut report).await?;
        }

        info!(
            job_id,
            rows = report.rows_received,
            points_written = report.points_written,
            batches = report.batches,
            failed_points = report.manifest.failed_points.len(),
            rejected_rows = report.manifest.rejected_rows.len(),
            "📥 Migration load finished"
        );

        if !report.manifest.is_empty() {
            let error = GridloadError::validation(format!(
                "{} points failed, {} rows rejected",
                report.manifest.failed_points.len(),
                report.manifest.rejected_rows.len()
            ));
            return Err(JobInterrupt::Failed {
                status,
                error,
                manifest: Some(report.manifest),
            });
        }
        Ok(())
    }

    async fn write_batch(
        &self,
        job: &MigrationJob,
        batch_index: usize,
        batch: &[TimeSeriesPoint],
        report: &mut LoadReport,
    ) -> StepResult<()> {
        self.check_cancellation(job, MigrationStatus::Loading).await?;

        let result = self.load_stage.writer().write_batch(batch_index, batch).await;
        report.batches += 1;
        report.points_submitted += result.submitted;
        report.points_written += result.written;
        if result.used_fallback {
            report.fallback_batches += 1;
        }
        report.manifest.failed_points.extend(result.failed);
        Ok(())
    }

    fn original_input(job: &MigrationJob) -> Value {
        serde_json::to_value(job).unwrap_or(Value::Null)
    }

    async fn notify(&self, event: &NotificationEvent) {
        if let Err(error) = self.deps.notifier.notify(event).await {
            log_error(
                "migration_orchestrator",
                "notify",
                &error.to_string(),
                Some(&event.execution_or_job_id),
            );
        }
    }

    async fn notify_failure(
        &self,
        kind: NotificationKind,
        job: &MigrationJob,
        stage: &str,
        error: &GridloadError,
        manifest: Option<FailureManifest>,
    ) {
        let attempts = self.settings.export_retry.max_attempts;
        let context = ErrorContext::new(&job.job_id, stage, attempts, attempts);
        let classification = self.deps.classifier.classify_error(error, &context);

        let mut event = NotificationEvent::failure(
            kind,
            &job.job_id,
            stage,
            &classification,
            Self::original_input(job),
        );
        if let Some(manifest) = manifest {
            event = event.with_manifest(manifest);
        }
        self.notify(&event).await;
    }

    async fn fail_job(
        &self,
        machine: &MigrationStateMachine,
        job: &MigrationJob,
        status: MigrationStatus,
        error: GridloadError,
        manifest: Option<FailureManifest>,
    ) {
        let detail = format!("{}: {error}", status.as_str());
        if let Err(transition_error) = machine
            .transition_from(status, MigrationEvent::fail_with_error(&detail))
            .await
        {
            log_error(
                "migration_orchestrator",
                "fail_job",
                &transition_error.to_string(),
                Some(&job.job_id),
            );
            return;
        }

        log_migration_operation("fail", &job.job_id, "failed", None, Some(&detail));
        self.notify_failure(
            NotificationKind::MigrationFailure,
            job,
            status.as_str(),
            &error,
            manifest,
        )
        .await;

        if job.rollback_enabled {
            self.start_rollback(machine, job).await;
        }
    }

    async fn start_rollback(&self, machine: &MigrationStateMachine, job: &MigrationJob) {
        match machine
            .transition_from(MigrationStatus::Failed, MigrationEvent::StartRollback)
            .await
        {
            Ok(_) => self.rollback(machine, job).await,
            Err(transition_error) => log_error(
                "migration_orchestrator",
                "start_rollback",
                &transition_error.to_string(),
                Some(&job.job_id),
            ),
        }
    }

    async fn cancel_job(
        &self,
        machine: &MigrationStateMachine,
        job: &MigrationJob,
        status: MigrationStatus,
        rollback: bool,
    ) {
        let event = if rollback {
            MigrationEvent::CancelWithRollback
        } else {
            MigrationEvent::Cancel
        };

        match machine.transition_from(status, event).await {
            Ok(MigrationStatus::RollingBack) => self.rollback(machine, job).await,
            Ok(next) => log_migration_operation(
                "cancel",
                &job.job_id,
                next.as_str(),
                None,
                Some("exported and loaded data left in place"),
            ),
            Err(transition_error) => log_error(
                "migration_orchestrator",
                "cancel_job",
                &transition_error.to_string(),
                Some(&job.job_id),
            ),
        }
    }

    /// Points written by this job: provenance tag, target measurement and time range
    fn provenance_query(&self, job: &MigrationJob) -> PointQuery {
        PointQuery::measurement(&job.target_selector.measurement)
            .in_range(job.source_selector.time_range)
            .with_tag(&self.settings.provenance_tag, &job.job_id)
    }

    async fn remove_job_data(&self, job: &MigrationJob) -> Result<usize> {
        let query = self.provenance_query(job);
        let store = self.deps.point_store.as_ref();
        let staging = self.deps.staging.as_ref();

        let removed = self
            .with_retry("rollback_delete", |_| store.delete(&query))
            .await?;
        let remaining = self
            .with_retry("rollback_verify", |_| store.count(&query))
            .await?;
        if remaining > 0 {
            return Err(GridloadError::RollbackFailure {
                job_id: job.job_id.clone(),
                message: format!("{remaining} points remain after delete"),
            });
        }

        self.with_retry("purge_staging", |_| staging.purge(&job.job_id))
            .await?;
        Ok(removed)
    }

    async fn rollback(&self, machine: &MigrationStateMachine, job: &MigrationJob) {
        log_migration_operation("rollback", &job.job_id, "rolling_back", None, None);

        match self.remove_job_data(job).await {
            Ok(removed) => {
                match machine
                    .transition_from(MigrationStatus::RollingBack, MigrationEvent::RollbackComplete)
                    .await
                {
                    Ok(_) => log_migration_operation(
                        "rollback",
                        &job.job_id,
                        "rolled_back",
                        None,
                        Some(&format!("{removed} points removed")),
                    ),
                    Err(transition_error) => log_error(
                        "migration_orchestrator",
                        "rollback",
                        &transition_error.to_string(),
                        Some(&job.job_id),
                    ),
                }
            }
            Err(rollback_error) => {
                let message = match &rollback_error {
                    GridloadError::RollbackFailure { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                error!(
                    job_id = %job.job_id,
                    error = %message,
                    "🚨 Rollback failed, operator intervention required"
                );

                if let Err(transition_error) = machine
                    .transition_from(
                        MigrationStatus::RollingBack,
                        MigrationEvent::RollbackFailed(format!("rollback failed: {message}")),
                    )
                    .await
                {
                    log_error(
                        "migration_orchestrator",
                        "rollback",
                        &transition_error.to_string(),
                        Some(&job.job_id),
                    );
                }

                let failure = GridloadError::RollbackFailure {
                    job_id: job.job_id.clone(),
                    message,
                };
                self.notify_failure(
                    NotificationKind::RollbackFailure,
                    job,
                    MigrationStatus::RollingBack.as_str(),
                    &failure,
                    None,
                )
                .await;
            }
        }
    }
}

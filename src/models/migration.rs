//! # Migration Job Models
//!
//! Start requests, durable job records, export checkpoints and the
//! transition audit trail for the migration orchestrator.

use super::file_descriptor::DatasetType;
use crate::error::{GridloadError, Result};
use crate::state_machine::MigrationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Where historical records are read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSelector {
    pub database: String,
    pub table: String,
    pub time_range: TimeRange,
}

/// Where migrated points are written to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelector {
    pub bucket: String,
    pub measurement: String,
}

fn default_true() -> bool {
    true
}

fn default_dataset_type() -> DatasetType {
    DatasetType::General
}

/// Start request for a migration job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    /// Caller-chosen id; generated when absent
    #[serde(default)]
    pub job_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub source: Option<SourceSelector>,
    #[serde(default)]
    pub target: Option<TargetSelector>,
    pub batch_size: usize,
    #[serde(default = "default_true")]
    pub validation_enabled: bool,
    #[serde(default = "default_true")]
    pub rollback_enabled: bool,
    /// Mapping used to turn source records into points
    #[serde(default = "default_dataset_type")]
    pub dataset_type: DatasetType,
}

impl MigrationConfig {
    pub fn new(
        name: impl Into<String>,
        source: SourceSelector,
        target: TargetSelector,
        batch_size: usize,
    ) -> Self {
        Self {
            job_id: None,
            name: name.into(),
            source: Some(source),
            target: Some(target),
            batch_size,
            validation_enabled: true,
            rollback_enabled: true,
            dataset_type: DatasetType::General,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation_enabled = enabled;
        self
    }

    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.rollback_enabled = enabled;
        self
    }

    pub fn with_dataset_type(mut self, dataset_type: DatasetType) -> Self {
        self.dataset_type = dataset_type;
        self
    }

    /// Check the request before any job record is created
    pub fn validate(&self) -> Result<(&SourceSelector, &TargetSelector)> {
        if self.batch_size == 0 {
            return Err(GridloadError::invalid_config("batch size must be greater than zero"));
        }
        if let Some(job_id) = &self.job_id {
            if job_id.trim().is_empty() {
                return Err(GridloadError::invalid_config("job id must not be blank"));
            }
        }

        let source = self
            .source
            .as_ref()
            .ok_or_else(|| GridloadError::invalid_config("source selector is required"))?;
        if source.database.trim().is_empty() || source.table.trim().is_empty() {
            return Err(GridloadError::invalid_config(
                "source selector requires database and table",
            ));
        }
        if source.time_range.is_empty() {
            return Err(GridloadError::invalid_config(format!(
                "time range is empty: {} >= {}",
                source.time_range.start, source.time_range.end
            )));
        }

        let target = self
            .target
            .as_ref()
            .ok_or_else(|| GridloadError::invalid_config("target selector is required"))?;
        if target.bucket.trim().is_empty() || target.measurement.trim().is_empty() {
            return Err(GridloadError::invalid_config(
                "target selector requires bucket and measurement",
            ));
        }

        Ok((source, target))
    }
}

/// Durable migration job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJob {
    pub job_id: String,
    pub name: String,
    pub source_selector: SourceSelector,
    pub target_selector: TargetSelector,
    pub batch_size: usize,
    pub validation_enabled: bool,
    pub rollback_enabled: bool,
    pub dataset_type: DatasetType,
    pub status: MigrationStatus,
    pub progress_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl MigrationJob {
    /// Build a `Pending` record from an already validated start request
    pub fn pending(
        job_id: impl Into<String>,
        config: &MigrationConfig,
        source: &SourceSelector,
        target: &TargetSelector,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            name: config.name.clone(),
            source_selector: source.clone(),
            target_selector: target.clone(),
            batch_size: config.batch_size,
            validation_enabled: config.validation_enabled,
            rollback_enabled: config.rollback_enabled,
            dataset_type: config.dataset_type,
            status: MigrationStatus::Pending,
            progress_percentage: 0.0,
            created_at: now,
            updated_at: now,
            error_detail: None,
        }
    }

    pub fn status_report(&self) -> JobStatusReport {
        JobStatusReport {
            job_id: self.job_id.clone(),
            status: self.status,
            progress_percentage: self.progress_percentage,
            error_detail: self.error_detail.clone(),
            rollback_pending: false,
        }
    }
}

/// Resume marker for an interrupted export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub job_id: String,
    pub last_exported_offset: u64,
    pub chunks_written: usize,
    /// Records staged so far
    #[serde(default)]
    pub records_exported: u64,
    /// Set once the source cursor is exhausted
    pub export_complete: bool,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn initial(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            last_exported_offset: 0,
            chunks_written: 0,
            records_exported: 0,
            export_complete: false,
            updated_at: Utc::now(),
        }
    }
    /// Whether writing `self` over `stored` would lose export progress
    pub fn regresses(&self, stored: &Checkpoint) -> bool {
        self.chunks_written < stored.chunks_written
            || (stored.export_complete && !self.export_complete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: MigrationStatus,
    pub progress_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Failed with rollback enabled, but the rollback never started;
    /// `resume` runs it
    #[serde(default)]
    pub rollback_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub accepted: bool,
}

/// Durable cancel request flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRequest {
    pub rollback: bool,
}

/// Audit row appended on every applied status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTransition {
    pub job_id: String,
    /// `None` for the creation row
    pub from_status: Option<MigrationStatus>,
    pub to_status: MigrationStatus,
    pub sort_key: i32,
    pub most_recent: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

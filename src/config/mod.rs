//! # Gridload Configuration System
//!
//! YAML-based configuration with environment overlays. Every section has
//! working defaults, so an empty file (or no file at all, via
//! [`GridloadConfig::default`]) yields a usable configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gridload_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let threshold = manager.config().router.inline_threshold_mb;
//! let batch_size = manager.config().load.batch_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::system;
use crate::resilience::RetryPolicy;
use crate::state_machine::WorkflowState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring gridload-config.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridloadConfig {
    /// Object classification and path selection
    pub router: RouterConfig,

    /// Per-state retry policies for the pipeline
    pub workflow: WorkflowConfig,

    /// Batch writing to the target store
    pub load: LoadConfig,

    /// Migration export, validation and staging
    pub migration: MigrationSettings,

    /// Lifecycle event channel
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Files at or above this size take the batch-compute path
    pub inline_threshold_mb: u64,
    /// Bucket for processed output; the input bucket when unset
    pub output_bucket: Option<String>,
    pub output_prefix: String,
    pub inline_timeout_seconds: u64,
    pub inline_memory_mb: u32,
    pub batch_timeout_seconds: u64,
    pub batch_memory_mb: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            inline_threshold_mb: system::DEFAULT_INLINE_THRESHOLD_MB,
            output_bucket: None,
            output_prefix: system::DEFAULT_OUTPUT_PREFIX.to_string(),
            inline_timeout_seconds: 900,
            inline_memory_mb: 3008,
            batch_timeout_seconds: 14_400,
            batch_memory_mb: 16_384,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub route: RetryPolicy,
    pub process_inline: RetryPolicy,
    pub process_batch_compute: RetryPolicy,
    pub load: RetryPolicy,
    pub index: RetryPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            route: RetryPolicy::fast_stage(),
            process_inline: RetryPolicy::fast_stage(),
            process_batch_compute: RetryPolicy::batch_compute_stage(),
            load: RetryPolicy::fast_stage(),
            index: RetryPolicy::fast_stage(),
        }
    }
}

impl WorkflowConfig {
    /// Retry policy governing a pipeline state
    ///
    /// `ProcessingChoice` and the terminal states make no external call and
    /// never retry.
    pub fn policy_for(&self, state: WorkflowState) -> RetryPolicy {
        match state {
            WorkflowState::Route => self.route.clone(),
            WorkflowState::ProcessInline => self.process_inline.clone(),
            WorkflowState::ProcessBatchCompute => self.process_batch_compute.clone(),
            WorkflowState::Load => self.load.clone(),
            WorkflowState::Index => self.index.clone(),
            WorkflowState::ProcessingChoice
            | WorkflowState::Complete
            | WorkflowState::NotifyFailure => RetryPolicy::no_retry(),
        }
    }

    /// Apply one policy to every stage
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            route: policy.clone(),
            process_inline: policy.clone(),
            process_batch_compute: policy.clone(),
            load: policy.clone(),
            index: policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadConfig {
    pub batch_size: usize,
    /// Bounded number of batches in flight per execution
    pub concurrency: usize,
    /// Whole-batch retry before falling back to per-point writes
    pub batch_retry: RetryPolicy,
    /// Treat a non-empty failure manifest as a validation failure
    pub fail_on_partial: bool,
    pub health_check_enabled: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: system::DEFAULT_LOAD_BATCH_SIZE,
            concurrency: system::DEFAULT_LOAD_CONCURRENCY,
            batch_retry: RetryPolicy::load_batch(),
            fail_on_partial: false,
            health_check_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Records per source page; each page becomes one staged chunk
    pub export_page_size: usize,
    /// Allowed relative count mismatch between source and staging
    pub validation_tolerance: f64,
    pub validation_sample_size: usize,
    /// Tag stamped on migrated points and used to scope rollback
    pub provenance_tag: String,
    /// Filesystem staging root; in-memory staging when unset
    pub staging_directory: Option<PathBuf>,
    /// Retry policy for source reads and staging writes
    pub export_retry: RetryPolicy,
    /// Lease on a job's run claim, renewed at every page, chunk and batch
    ///
    /// Must outlast the slowest single step including its retries; another
    /// instance may take over a job whose lease has run out.
    pub claim_lease_ms: u64,
}

impl MigrationSettings {
    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            export_page_size: system::DEFAULT_EXPORT_PAGE_SIZE,
            validation_tolerance: 0.0,
            validation_sample_size: system::DEFAULT_VALIDATION_SAMPLE_SIZE,
            provenance_tag: system::DEFAULT_MIGRATION_PROVENANCE_TAG.to_string(),
            staging_directory: None,
            export_retry: RetryPolicy::fast_stage(),
            claim_lease_ms: system::DEFAULT_CLAIM_LEASE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl GridloadConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if self.router.inline_threshold_mb == 0 {
            return Err(ConfigurationError::invalid_value(
                "router.inline_threshold_mb",
                "0",
                "threshold must be greater than 0",
            ));
        }

        if self.router.output_prefix.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "router.output_prefix",
                "router configuration",
            ));
        }

        if self.load.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "load.batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if self.load.concurrency == 0 || self.load.concurrency > system::MAX_LOAD_CONCURRENCY {
            return Err(ConfigurationError::invalid_value(
                "load.concurrency",
                self.load.concurrency.to_string(),
                format!("concurrency must be within 1..={}", system::MAX_LOAD_CONCURRENCY),
            ));
        }

        if self.migration.export_page_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "migration.export_page_size",
                "0",
                "page size must be greater than 0",
            ));
        }

        if self.migration.claim_lease_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "migration.claim_lease_ms",
                "0",
                "claim lease must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.migration.validation_tolerance) {
            return Err(ConfigurationError::invalid_value(
                "migration.validation_tolerance",
                self.migration.validation_tolerance.to_string(),
                "tolerance is a fraction within 0.0..=1.0",
            ));
        }

        if self.migration.provenance_tag.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "migration.provenance_tag",
                "migration configuration",
            ));
        }

        let policies = [
            ("workflow.route", &self.workflow.route),
            ("workflow.process_inline", &self.workflow.process_inline),
            ("workflow.process_batch_compute", &self.workflow.process_batch_compute),
            ("workflow.load", &self.workflow.load),
            ("workflow.index", &self.workflow.index),
            ("load.batch_retry", &self.load.batch_retry),
            ("migration.export_retry", &self.migration.export_retry),
        ];
        for (field, policy) in policies {
            policy.validate().map_err(|reason| {
                ConfigurationError::invalid_value(field, format!("{policy:?}"), reason)
            })?;
        }

        Ok(())
    }
}

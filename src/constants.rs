//! # System Constants
//!
//! Defaults, lifecycle event names and routing tables that define the
//! operational boundaries of the ingestion pipeline and migration engine.

/// Lifecycle events published on the [`crate::events::EventPublisher`]
pub mod events {
    // Pipeline execution lifecycle
    pub const PIPELINE_EXECUTION_STARTED: &str = "pipeline.execution.started";
    pub const PIPELINE_EXECUTION_COMPLETED: &str = "pipeline.execution.completed";
    pub const PIPELINE_EXECUTION_FAILED: &str = "pipeline.execution.failed";
    pub const PIPELINE_EXECUTION_DUPLICATE: &str = "pipeline.execution.duplicate";
    pub const PIPELINE_STATE_ENTERED: &str = "pipeline.state.entered";

    // Migration lifecycle
    pub const MIGRATION_JOB_CREATED: &str = "migration.job.created";
    pub const MIGRATION_JOB_TRANSITIONED: &str = "migration.job.transitioned";
    pub const MIGRATION_JOB_PROGRESS: &str = "migration.job.progress";

    // Notifications
    pub const NOTIFICATION_PUBLISHED: &str = "notification.published";
}

/// System-wide defaults
pub mod system {
    /// Files at or above this size take the batch-compute path
    pub const DEFAULT_INLINE_THRESHOLD_MB: u64 = 100;
    pub const BYTES_PER_MB: u64 = 1024 * 1024;

    pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;
    pub const DEFAULT_LOAD_CONCURRENCY: usize = 4;
    pub const MAX_LOAD_CONCURRENCY: usize = 64;

    pub const DEFAULT_EXPORT_PAGE_SIZE: usize = 1000;
    pub const DEFAULT_VALIDATION_SAMPLE_SIZE: usize = 100;
    pub const DEFAULT_CLAIM_LEASE_MS: u64 = 30_000;

    /// Tag written on every migrated point so rollback can target exactly
    /// the points a job produced
    pub const DEFAULT_MIGRATION_PROVENANCE_TAG: &str = "migration_job";
    pub const DEFAULT_SOURCE_FILE_TAG: &str = "source_file";
    pub const DATASET_TYPE_TAG: &str = "dataset_type";

    pub const DEFAULT_OUTPUT_PREFIX: &str = "processed";
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

    /// Share of overall progress attributed to the export phase
    pub const EXPORT_PROGRESS_SHARE: f64 = 50.0;

    pub const HEALTH_PROBE_MEASUREMENT: &str = "_gridload_health";
}

/// Keyword tables for best-effort dataset type inference, checked in order
pub mod dataset_keywords {
    pub const GENERATION: &[&str] = &["generation", "generator", "solar", "wind", "plant"];
    pub const CONSUMPTION: &[&str] = &["consumption", "demand", "usage", "meter", "load_profile"];
    pub const TRANSMISSION: &[&str] = &["transmission", "substation", "grid", "interconnect"];
}

//! # Migration Engine
//!
//! Historical backfills from a source time-series backend into the target
//! point store, driven as long-running jobs with durable state.
//!
//! ## Core Components
//!
//! - **MigrationOrchestrator**: control API (`start`, `status`, `cancel`, `resume`) and the job tasks
//! - **JobStore**: compare-and-set job records and the transition audit trail
//! - **SourceReader**: paginated cursor over the source backend
//! - **StagingArea**: checkpointed export chunks
//! - **ExportValidator**: count and sampled-checksum comparison of staged data

pub mod job_store;
pub mod orchestrator;
#[cfg(feature = "postgres")]
pub mod pg_job_store;
pub mod source;
pub mod staging;
pub mod validator;

pub use job_store::{append_detail, lease_expiry, CreateOutcome, InMemoryJobStore, JobClaim, JobStore};
pub use orchestrator::{MigrationDependencies, MigrationOrchestrator};
#[cfg(feature = "postgres")]
pub use pg_job_store::PgJobStore;
pub use source::{InMemorySource, SourcePage, SourceReader};
pub use staging::{staging_area_for, FileStagingArea, InMemoryStagingArea, StagingArea};
pub use validator::{record_checksum, sample_positions, ExportValidator, ValidationReport};

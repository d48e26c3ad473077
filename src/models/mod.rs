//! # Data Models
//!
//! Plain data carried between the router, the workflow orchestrator, the
//! load stage and the migration orchestrator.

pub mod file_descriptor;
pub mod migration;
pub mod point;
pub mod processing;
pub mod row;

pub use file_descriptor::{
    DatasetType, EventEnvelope, FileDescriptor, FileFormat, FileIdentity, FormatFamily,
    ObjectCreatedEvent,
};
pub use migration::{
    CancelResponse, CancellationRequest, Checkpoint, JobStatusReport, JobTransition,
    MigrationConfig, MigrationJob, SourceSelector, StartResponse, TargetSelector, TimeRange,
};
pub use point::{FieldValue, PointId, TimeSeriesPoint};
pub use processing::{
    InputFile, ProcessingDescriptor, ProcessingOutcome, ProcessingPath, ProcessingRequest,
    ProcessorConfig,
};
pub use row::CanonicalRow;

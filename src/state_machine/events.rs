use serde::{Deserialize, Serialize};

/// Events that drive migration job status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MigrationEvent {
    /// Claim the job and begin reading the source
    StartExport,
    /// Export finished, compare staged data with the source
    StartValidation,
    /// Begin writing staged data to the target
    StartLoading,
    /// All batches written
    Complete,
    /// Stage failed with error detail
    Fail(String),
    /// Remove data written by this job
    StartRollback,
    /// Rollback verified
    RollbackComplete,
    /// Rollback could not finish
    RollbackFailed(String),
    /// Explicit cancel request
    Cancel,
    /// Explicit cancel request that also asks for cleanup
    CancelWithRollback,
}

impl MigrationEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StartExport => "start_export",
            Self::StartValidation => "start_validation",
            Self::StartLoading => "start_loading",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::StartRollback => "start_rollback",
            Self::RollbackComplete => "rollback_complete",
            Self::RollbackFailed(_) => "rollback_failed",
            Self::Cancel => "cancel",
            Self::CancelWithRollback => "cancel_with_rollback",
        }
    }

    /// Extract error detail if this is a failure event
    pub fn error_detail(&self) -> Option<&str> {
        match self {
            Self::Fail(detail) | Self::RollbackFailed(detail) => Some(detail),
            Self::CancelWithRollback => Some("cancelled by request"),
            _ => None,
        }
    }

    /// Create a failure event with the given error detail
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

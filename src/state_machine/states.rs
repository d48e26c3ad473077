use serde::{Deserialize, Serialize};
use std::fmt;

/// States of a single pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Classify the object and build a processing descriptor
    Route,
    /// Pick inline or batch-compute processing
    ProcessingChoice,
    /// Run the processing executor in-process
    ProcessInline,
    /// Submit the processing executor to batch compute
    ProcessBatchCompute,
    /// Convert canonical rows and write points
    Load,
    /// Hand the loaded data to the indexer
    Index,
    /// Execution finished successfully
    Complete,
    /// Execution failed and the failure has been published
    NotifyFailure,
}

impl WorkflowState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::NotifyFailure)
    }

    /// Stage name used in notifications and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::ProcessingChoice => "processing_choice",
            Self::ProcessInline => "process_inline",
            Self::ProcessBatchCompute => "process_batch_compute",
            Self::Load => "load",
            Self::Index => "index",
            Self::Complete => "complete",
            Self::NotifyFailure => "notify_failure",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Migration job status definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Job record created, export not yet claimed
    Pending,
    /// Reading source records into the staging area
    Exporting,
    /// Comparing staged data against the source
    Validating,
    /// Writing staged records to the target store
    Loading,
    /// All records loaded
    Completed,
    /// Job failed; rollback may follow
    Failed,
    /// Deleting points this job wrote to the target
    RollingBack,
    /// Rollback finished, target holds no points for this job
    RolledBack,
    /// Cancelled on request
    Cancelled,
}

impl MigrationStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    ///
    /// `Failed` is only terminal once no rollback will follow; the orchestrator
    /// decides that, so it is reported as terminal here.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::RolledBack | Self::Cancelled
        )
    }

    /// Check if the job is being worked on
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Exporting | Self::Validating | Self::Loading | Self::RollingBack
        )
    }

    /// States from which an explicit cancel request is honoured
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Exporting | Self::Validating | Self::Loading
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Exporting => "exporting",
            Self::Validating => "validating",
            Self::Loading => "loading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "exporting" => Ok(Self::Exporting),
            "validating" => Ok(Self::Validating),
            "loading" => Ok(Self::Loading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rolling_back" => Ok(Self::RollingBack),
            "rolled_back" => Ok(Self::RolledBack),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid migration status: {s}")),
        }
    }
}

/// Default status for new jobs
impl Default for MigrationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

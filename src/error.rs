//! # Error Taxonomy
//!
//! Every failure in the pipeline and migration layers is expressed as a
//! [`GridloadError`]. Stage-local code classifies errors through
//! [`GridloadError::kind`], and retry policies decide on that kind alone.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse error discriminant used by declarative retry policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unsupported or missing file information (fatal, never retried)
    Classification,
    /// Throttling, timeouts, dropped connections
    TransientService,
    /// Schema or data integrity problems (fatal, never retried)
    Validation,
    /// Target store health check failed
    StoreUnavailable,
    /// A non-terminal job already exists for the id
    JobAlreadyRunning,
    /// A terminal job already exists for the id
    JobAlreadyExists,
    /// Migration start request failed validation
    InvalidConfig,
    /// Rollback could not complete; operator intervention required
    RollbackFailure,
    /// Requested entity does not exist
    NotFound,
    /// Illegal or lost state transition
    StateTransition,
    /// Anything else
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classification => "classification",
            Self::TransientService => "transient_service",
            Self::Validation => "validation",
            Self::StoreUnavailable => "store_unavailable",
            Self::JobAlreadyRunning => "job_already_running",
            Self::JobAlreadyExists => "job_already_exists",
            Self::InvalidConfig => "invalid_config",
            Self::RollbackFailure => "rollback_failure",
            Self::NotFound => "not_found",
            Self::StateTransition => "state_transition",
            Self::Internal => "internal",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridloadError {
    #[error("Unsupported file format '{extension}' for key {key}")]
    UnsupportedFormat { key: String, extension: String },

    #[error("Missing file information: {field}")]
    MissingFileInfo { field: String },

    #[error("Transient error from {service}: {message}")]
    TransientService { service: String, message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Target store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Job {job_id} already has a non-terminal record")]
    JobAlreadyRunning { job_id: String },

    #[error("Job {job_id} already exists in terminal status {status}")]
    JobAlreadyExists { job_id: String, status: String },

    #[error("Invalid migration config: {message}")]
    InvalidConfig { message: String },

    #[error("Rollback failed for job {job_id}: {message}")]
    RollbackFailure { job_id: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Job store error: {0}")]
    JobStore(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GridloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } | Self::MissingFileInfo { .. } => {
                ErrorKind::Classification
            }
            Self::TransientService { .. } => ErrorKind::TransientService,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::JobAlreadyRunning { .. } => ErrorKind::JobAlreadyRunning,
            Self::JobAlreadyExists { .. } => ErrorKind::JobAlreadyExists,
            Self::InvalidConfig { .. } | Self::Configuration(_) => ErrorKind::InvalidConfig,
            Self::RollbackFailure { .. } => ErrorKind::RollbackFailure,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StateTransition(_) => ErrorKind::StateTransition,
            // Job store and staging outages are infrastructure hiccups
            Self::JobStore(_) | Self::Staging(_) => ErrorKind::TransientService,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn missing_file_info(field: impl Into<String>) -> Self {
        Self::MissingFileInfo {
            field: field.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Fatal errors reach a failure state without consulting any retry policy
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Classification | ErrorKind::Validation | ErrorKind::InvalidConfig
        )
    }
}

impl From<serde_json::Error> for GridloadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for GridloadError {
    fn from(err: sqlx::Error) -> Self {
        Self::JobStore(err.to_string())
    }
}

impl From<crate::state_machine::StateMachineError> for GridloadError {
    fn from(err: crate::state_machine::StateMachineError) -> Self {
        use crate::state_machine::StateMachineError;
        match err {
            StateMachineError::PersistenceFailed { reason } => Self::JobStore(reason),
            other => Self::StateTransition(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GridloadError>;

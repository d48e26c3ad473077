//! # Error Classification
//!
//! Turns pipeline and migration failures into actionable classifications.
//!
//! ## Overview
//!
//! Every terminal failure is published with a stable error code, a category
//! and remediation suggestions so that an operator can diagnose it without
//! re-running the execution. The classifier also interprets free-text error
//! messages coming back from external collaborators (processing executors,
//! index services) and maps them onto the [`GridloadError`] taxonomy.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ GridloadError   │────▶│ ErrorClassifier │────▶│ Classification  │
//! │ + ErrorContext  │     │                 │     │ (code, category)│
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use gridload_core::orchestration::error_classifier::{
//!     ErrorClassifier, ErrorContext, StandardErrorClassifier,
//! };
//! use gridload_core::GridloadError;
//!
//! let classifier = StandardErrorClassifier::new();
//! let context = ErrorContext::new("exec-1", "load", 3, 3);
//! let classification =
//!     classifier.classify_error(&GridloadError::transient("store", "timeout"), &context);
//!
//! assert!(classification.is_final_attempt);
//! assert!(!classification.is_retryable);
//! ```

use crate::error::{ErrorKind, GridloadError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context information for error classification
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Pipeline execution id or migration job id
    pub execution_or_job_id: String,

    /// Workflow state or migration status where the error occurred
    pub stage: String,

    /// Current attempt number (1-based)
    pub attempt_number: u32,

    /// Maximum allowed attempts
    pub max_attempts: u32,

    /// Additional context metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(
        execution_or_job_id: impl Into<String>,
        stage: impl Into<String>,
        attempt_number: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            execution_or_job_id: execution_or_job_id.into(),
            stage: stage.into(),
            attempt_number,
            max_attempts,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    fn is_final_attempt(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Primary error category
    pub error_category: ErrorCategory,

    /// Whether another attempt could still succeed
    pub is_retryable: bool,

    /// Stable error code for tracking
    pub error_code: String,

    /// Human-readable error message
    pub error_message: String,

    /// Suggested remediation actions
    pub remediation_suggestions: Vec<String>,

    /// Whether this was the final attempt
    pub is_final_attempt: bool,

    /// Additional classification metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Unsupported or incomplete file information
    Classification,

    /// Throttling, timeouts, dropped connections
    Transient,

    /// Schema or data integrity problem
    Validation,

    /// Target store failed its health probe
    StoreUnavailable,

    /// Control-plane conflict (job already running or exists)
    Conflict,

    /// Invalid configuration or start request
    Configuration,

    /// Rollback incomplete; requires operator intervention
    RollbackFailure,

    /// Referenced entity missing
    NotFound,

    /// Illegal or lost state transition
    StateInconsistency,

    /// Unknown error
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Classification => write!(f, "Classification"),
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::StoreUnavailable => write!(f, "Store Unavailable"),
            ErrorCategory::Conflict => write!(f, "Conflict"),
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::RollbackFailure => write!(f, "Rollback Failure"),
            ErrorCategory::NotFound => write!(f, "Not Found"),
            ErrorCategory::StateInconsistency => write!(f, "State Inconsistency"),
            ErrorCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    /// Classify an error and provide handling recommendations
    fn classify_error(&self, error: &GridloadError, context: &ErrorContext)
        -> ErrorClassification;

    /// Get the classifier name for identification
    fn classifier_name(&self) -> &'static str;
}

/// Standard classifier over the [`GridloadError`] taxonomy
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Map a free-text collaborator failure onto the error taxonomy
    ///
    /// Collaborators report errors as text; keywords decide whether the
    /// failure is worth retrying. Anything unrecognized is treated as
    /// transient so the stage retry policy still gets a chance.
    pub fn classify_message(service: &str, message: &str) -> GridloadError {
        let lowered = message.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

        if contains_any(&["unsupported format", "unsupported file"]) {
            GridloadError::UnsupportedFormat {
                key: service.to_string(),
                extension: String::new(),
            }
        } else if contains_any(&["schema", "invalid", "constraint", "violation", "parse", "malformed"]) {
            GridloadError::validation(format!("{service}: {message}"))
        } else if contains_any(&["unavailable", "health check"]) && service.contains("store") {
            GridloadError::store_unavailable(message)
        } else {
            GridloadError::transient(service, message)
        }
    }

    fn error_code(error: &GridloadError) -> &'static str {
        match error {
            GridloadError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            GridloadError::MissingFileInfo { .. } => "MISSING_FILE_INFO",
            GridloadError::TransientService { message, .. } => {
                let lowered = message.to_lowercase();
                if lowered.contains("throttl") || lowered.contains("rate limit") {
                    "SERVICE_THROTTLED"
                } else if lowered.contains("timeout") || lowered.contains("timed out") {
                    "SERVICE_TIMEOUT"
                } else if lowered.contains("connection") || lowered.contains("network") {
                    "SERVICE_CONNECTION_ERROR"
                } else {
                    "TRANSIENT_SERVICE_ERROR"
                }
            }
            GridloadError::Validation { .. } => "VALIDATION_ERROR",
            GridloadError::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            GridloadError::JobAlreadyRunning { .. } => "JOB_ALREADY_RUNNING",
            GridloadError::JobAlreadyExists { .. } => "JOB_ALREADY_EXISTS",
            GridloadError::InvalidConfig { .. } | GridloadError::Configuration(_) => {
                "CONFIGURATION_ERROR"
            }
            GridloadError::RollbackFailure { .. } => "ROLLBACK_FAILURE",
            GridloadError::NotFound { .. } => "NOT_FOUND",
            GridloadError::StateTransition(_) => "STATE_TRANSITION_ERROR",
            GridloadError::JobStore(_) => "JOB_STORE_ERROR",
            GridloadError::Staging(_) => "STAGING_ERROR",
            GridloadError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    fn category(kind: ErrorKind) -> ErrorCategory {
        match kind {
            ErrorKind::Classification => ErrorCategory::Classification,
            ErrorKind::TransientService => ErrorCategory::Transient,
            ErrorKind::Validation => ErrorCategory::Validation,
            ErrorKind::StoreUnavailable => ErrorCategory::StoreUnavailable,
            ErrorKind::JobAlreadyRunning | ErrorKind::JobAlreadyExists => ErrorCategory::Conflict,
            ErrorKind::InvalidConfig => ErrorCategory::Configuration,
            ErrorKind::RollbackFailure => ErrorCategory::RollbackFailure,
            ErrorKind::NotFound => ErrorCategory::NotFound,
            ErrorKind::StateTransition => ErrorCategory::StateInconsistency,
            ErrorKind::Internal => ErrorCategory::Unknown,
        }
    }

    fn get_category_suggestions(&self, category: ErrorCategory) -> Vec<String> {
        let suggestions: &[&str] = match category {
            ErrorCategory::Classification => &[
                "Check the object key has a supported extension",
                "Verify the upload event carries bucket, key and size",
            ],
            ErrorCategory::Transient => &[
                "Re-drive the execution once the collaborator recovers",
                "Review retry policy intervals for this stage",
            ],
            ErrorCategory::Validation => &[
                "Fix the source data or the dataset mapping table",
                "Inspect the rejected rows in the failure manifest",
            ],
            ErrorCategory::StoreUnavailable => &[
                "Check target store health and credentials",
                "Verify network reachability of the store endpoint",
            ],
            ErrorCategory::Conflict => &[
                "Wait for the running job to finish or cancel it",
                "Use a new job id for a fresh run",
            ],
            ErrorCategory::Configuration => &[
                "Review the migration start request or gridload-config.yaml",
            ],
            ErrorCategory::RollbackFailure => &[
                "Manually delete points tagged with this job id from the target",
                "Purge the job's staging area before re-running",
            ],
            ErrorCategory::NotFound => &["Verify the identifier is correct"],
            ErrorCategory::StateInconsistency => &[
                "Another instance may be driving the same job; check the transition history",
            ],
            ErrorCategory::Unknown => &["Check logs for details"],
        };
        suggestions.iter().map(|s| s.to_string()).collect()
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(
        &self,
        error: &GridloadError,
        context: &ErrorContext,
    ) -> ErrorClassification {
        let kind = error.kind();
        let error_category = Self::category(kind);
        let is_final_attempt = error.is_fatal() || context.is_final_attempt();
        let retryable_kind = matches!(
            kind,
            ErrorKind::TransientService | ErrorKind::StoreUnavailable
        );

        let mut metadata = context.metadata.clone();
        metadata.insert("error_kind".to_string(), serde_json::json!(kind));
        metadata.insert(
            "attempt_number".to_string(),
            serde_json::json!(context.attempt_number),
        );
        metadata.insert(
            "max_attempts".to_string(),
            serde_json::json!(context.max_attempts),
        );

        ErrorClassification {
            error_category,
            is_retryable: retryable_kind && !is_final_attempt,
            error_code: Self::error_code(error).to_string(),
            error_message: format!(
                "{} failed for {}: {}",
                context.stage, context.execution_or_job_id, error
            ),
            remediation_suggestions: self.get_category_suggestions(error_category),
            is_final_attempt,
            metadata,
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}

//! # Failure Notifications
//!
//! Terminal failures (and partial loads) are packaged into a
//! [`NotificationEvent`] carrying enough context to diagnose the problem
//! without re-running: the execution or job id, the failing stage, the
//! classified error and the original input.

use crate::constants::events as system_events;
use crate::error::Result;
use crate::events::publisher::EventPublisher;
use crate::load::manifest::FailureManifest;
use crate::orchestration::error_classifier::ErrorClassification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Pipeline execution reached `NotifyFailure`
    PipelineFailure,
    /// Load stage finished with a non-empty failure manifest
    PartialLoad,
    /// Migration job reached `Failed`
    MigrationFailure,
    /// Rollback failed; operator intervention required
    RollbackFailure,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineFailure => "pipeline_failure",
            Self::PartialLoad => "partial_load",
            Self::MigrationFailure => "migration_failure",
            Self::RollbackFailure => "rollback_failure",
        }
    }
}

/// Notification payload published on terminal failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub execution_or_job_id: String,
    pub stage: String,
    pub error: String,
    pub error_code: String,
    pub original_input: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<FailureManifest>,
}

impl NotificationEvent {
    /// Build a failure notification from a classified error
    pub fn failure(
        kind: NotificationKind,
        execution_or_job_id: impl Into<String>,
        stage: impl Into<String>,
        classification: &ErrorClassification,
        original_input: Value,
    ) -> Self {
        Self {
            kind,
            execution_or_job_id: execution_or_job_id.into(),
            stage: stage.into(),
            error: classification.error_message.clone(),
            error_code: classification.error_code.clone(),
            original_input,
            timestamp: Utc::now(),
            remediation: classification.remediation_suggestions.clone(),
            manifest: None,
        }
    }

    /// Build a partial-load notification carrying the failure manifest
    pub fn partial_load(
        execution_or_job_id: impl Into<String>,
        stage: impl Into<String>,
        manifest: FailureManifest,
        original_input: Value,
    ) -> Self {
        Self {
            kind: NotificationKind::PartialLoad,
            execution_or_job_id: execution_or_job_id.into(),
            stage: stage.into(),
            error: format!(
                "{} points failed, {} rows rejected",
                manifest.failed_points.len(),
                manifest.rejected_rows.len()
            ),
            error_code: "PARTIAL_LOAD".to_string(),
            original_input,
            timestamp: Utc::now(),
            remediation: vec!["Reconcile the failed point identities in the manifest".to_string()],
            manifest: Some(manifest),
        }
    }

    pub fn with_manifest(mut self, manifest: FailureManifest) -> Self {
        if !manifest.is_empty() {
            self.manifest = Some(manifest);
        }
        self
    }
}

/// Notification collaborator contract
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}

/// Notifier that republishes notifications on the lifecycle event channel
#[derive(Debug, Clone)]
pub struct PublisherNotifier {
    publisher: EventPublisher,
}

impl PublisherNotifier {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Notifier for PublisherNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;

        info!(
            kind = event.kind.as_str(),
            id = %event.execution_or_job_id,
            stage = %event.stage,
            error_code = %event.error_code,
            "📣 NOTIFICATION"
        );

        self.publisher
            .publish(system_events::NOTIFICATION_PUBLISHED, payload)
            .await;
        Ok(())
    }
}

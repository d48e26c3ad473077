use crate::error::{GridloadError, Result};
use crate::load::LoadReport;
use crate::models::{FileIdentity, ObjectCreatedEvent, ProcessingOutcome};
use crate::router::RoutedFile;
use crate::state_machine::WorkflowState;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Accumulated context of one pipeline execution
///
/// Each state reads what earlier states produced and the orchestrator merges
/// the state's output back in before advancing.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub event: ObjectCreatedEvent,
    /// Event as received, carried into failure notifications
    pub original_input: Value,
    pub routed: Option<RoutedFile>,
    pub processing: Option<ProcessingOutcome>,
    pub load_report: Option<LoadReport>,
    /// Attempts made per state, including the first
    pub attempts: BTreeMap<WorkflowState, u32>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, event: ObjectCreatedEvent) -> Self {
        let original_input = serde_json::to_value(&event).unwrap_or_default();
        Self {
            execution_id: execution_id.into(),
            event,
            original_input,
            routed: None,
            processing: None,
            load_report: None,
            attempts: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.event.identity()
    }

    pub fn identity_label(&self) -> Option<String> {
        self.identity().map(|i| i.to_string())
    }

    pub fn routed(&self) -> Result<&RoutedFile> {
        self.routed
            .as_ref()
            .ok_or_else(|| missing("routing result", &self.execution_id))
    }

    pub fn processing(&self) -> Result<&ProcessingOutcome> {
        self.processing
            .as_ref()
            .ok_or_else(|| missing("processing outcome", &self.execution_id))
    }

    pub fn record_attempts(&mut self, state: WorkflowState, attempts: u32) {
        *self.attempts.entry(state).or_insert(0) += attempts;
    }
}

fn missing(what: &str, execution_id: &str) -> GridloadError {
    GridloadError::StateTransition(format!(
        "execution {execution_id} reached a state without its {what}"
    ))
}

//! # Workflow Orchestrator
//!
//! Drives one pipeline execution per object-created event through
//! `Route → ProcessingChoice → ProcessInline | ProcessBatchCompute → Load →
//! Index → Complete`, with `NotifyFailure` reachable from every state.
//!
//! Each state runs under its own declarative
//! [`RetryPolicy`](crate::resilience::RetryPolicy) from
//! [`WorkflowConfig`]. A state's executor call produces a [`StateOutput`];
//! only after the retry interpreter reports success is the output merged
//! into the [`ExecutionContext`] and the next state chosen. Errors that the
//! policy will not retry, or that exhaust it, are classified and published
//! to the notification collaborator, and the execution stops in
//! `NotifyFailure`.
//!
//! Executions are keyed by file identity through an [`ExecutionRegistry`],
//! so replaying an event while its execution is running (or after it has
//! completed) does not start a second one.

use super::context::ExecutionContext;
use super::error_classifier::{ErrorClassifier, ErrorContext, StandardErrorClassifier};
use super::execution_registry::{
    BeginOutcome, ExecutionRegistry, InMemoryExecutionRegistry,
};
use super::executors::{IndexExecutor, IndexRequest, NoopIndexExecutor, ProcessingExecutor, RowReader};
use crate::config::{GridloadConfig, WorkflowConfig};
use crate::constants::events as system_events;
use crate::error::{GridloadError, Result};
use crate::events::{EventPublisher, NotificationEvent, NotificationKind, Notifier, PublisherNotifier};
use crate::load::{LoadReport, LoadRequest, LoadStage};
use crate::logging::{log_error, log_pipeline_operation};
use crate::models::{
    EventEnvelope, FileIdentity, ObjectCreatedEvent, ProcessingOutcome, ProcessingPath,
    ProcessingRequest,
};
use crate::resilience::execute_with_retry;
use crate::router::{RoutedFile, Router};
use crate::state_machine::WorkflowState;
use crate::store::PointStore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// External collaborators of the workflow orchestrator
#[derive(Clone)]
pub struct WorkflowDependencies {
    pub processing_executor: Arc<dyn ProcessingExecutor>,
    pub row_reader: Arc<dyn RowReader>,
    pub point_store: Arc<dyn PointStore>,
    pub index_executor: Arc<dyn IndexExecutor>,
    pub notifier: Arc<dyn Notifier>,
    pub registry: Arc<dyn ExecutionRegistry>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub event_publisher: EventPublisher,
}

impl WorkflowDependencies {
    /// Dependencies with in-process defaults for everything but the
    /// processing side and the target store
    ///
    /// Notifications are republished on the event publisher; indexing is a
    /// no-op and the execution registry lives in memory.
    pub fn new(
        processing_executor: Arc<dyn ProcessingExecutor>,
        row_reader: Arc<dyn RowReader>,
        point_store: Arc<dyn PointStore>,
    ) -> Self {
        let event_publisher = EventPublisher::default();
        Self {
            processing_executor,
            row_reader,
            point_store,
            index_executor: Arc::new(NoopIndexExecutor),
            notifier: Arc::new(PublisherNotifier::new(event_publisher.clone())),
            registry: Arc::new(InMemoryExecutionRegistry::new()),
            classifier: Arc::new(StandardErrorClassifier::new()),
            event_publisher,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_index_executor(mut self, index_executor: Arc<dyn IndexExecutor>) -> Self {
        self.index_executor = index_executor;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn ExecutionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the publisher; the default notifier follows it
    pub fn with_event_publisher(mut self, event_publisher: EventPublisher) -> Self {
        self.notifier = Arc::new(PublisherNotifier::new(event_publisher.clone()));
        self.event_publisher = event_publisher;
        self
    }
}

impl std::fmt::Debug for WorkflowDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDependencies")
            .field("classifier", &self.classifier.classifier_name())
            .field("event_publisher", &self.event_publisher)
            .finish_non_exhaustive()
    }
}

/// Result of one state's executor call, merged into context on success
#[derive(Debug, Clone)]
pub enum StateOutput {
    Routed(RoutedFile),
    PathChosen(ProcessingPath),
    Processed(ProcessingOutcome),
    Loaded(LoadReport),
    Indexed,
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed,
    Failed {
        failing_state: WorkflowState,
        error: GridloadError,
    },
    /// The identity already had a running or completed execution
    Duplicate {
        existing_execution_id: String,
        existing_state: WorkflowState,
    },
}

/// Observable summary of one execution
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub identity: Option<FileIdentity>,
    pub outcome: ExecutionOutcome,
    pub final_state: WorkflowState,
    pub state_attempts: BTreeMap<WorkflowState, u32>,
    pub processing_path: Option<ProcessingPath>,
    pub load_report: Option<LoadReport>,
    pub notifications: Vec<NotificationEvent>,
}

impl ExecutionSummary {
    pub fn is_completed(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Duplicate { .. })
    }

    pub fn attempts_for(&self, state: WorkflowState) -> u32 {
        self.state_attempts.get(&state).copied().unwrap_or(0)
    }

    pub fn error(&self) -> Option<&GridloadError> {
        match &self.outcome {
            ExecutionOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

pub struct WorkflowOrchestrator {
    router: Router,
    load_stage: LoadStage,
    policies: WorkflowConfig,
    deps: WorkflowDependencies,
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("router", &self.router)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl WorkflowOrchestrator {
    pub fn new(config: &GridloadConfig, deps: WorkflowDependencies) -> Self {
        Self {
            router: Router::new(config.router.clone()),
            load_stage: LoadStage::new(deps.point_store.clone(), config.load.clone()),
            policies: config.workflow.clone(),
            deps,
        }
    }

    pub fn with_load_stage(mut self, load_stage: LoadStage) -> Self {
        self.load_stage = load_stage;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn event_publisher(&self) -> &EventPublisher {
        &self.deps.event_publisher
    }

    /// Normalize a raw event envelope and run one execution per object
    ///
    /// An envelope that cannot be normalized still produces a summary ending
    /// in `NotifyFailure`, so no input is silently dropped.
    pub async fn handle_event(&self, raw: &Value) -> Vec<ExecutionSummary> {
        let events = EventEnvelope::from_json(raw).and_then(EventEnvelope::into_object_events);
        match events {
            Ok(events) => {
                let mut summaries = Vec::with_capacity(events.len());
                for event in events {
                    summaries.push(self.start_execution(event).await);
                }
                summaries
            }
            Err(error) => {
                let execution_id = Uuid::new_v4().to_string();
                warn!(
                    execution_id = %execution_id,
                    error = %error,
                    "⚠️ Event envelope could not be normalized"
                );
                let mut ctx = ExecutionContext::new(&execution_id, ObjectCreatedEvent::default());
                ctx.original_input = raw.clone();
                ctx.record_attempts(WorkflowState::Route, 1);
                vec![
                    self.fail_execution(ctx, WorkflowState::Route, error, 1, 1, Vec::new())
                        .await,
                ]
            }
        }
    }

    /// Start an execution for one canonical event, unless its identity is
    /// already owned by another execution
    pub async fn start_execution(&self, event: ObjectCreatedEvent) -> ExecutionSummary {
        let execution_id = Uuid::new_v4().to_string();
        let ctx = ExecutionContext::new(&execution_id, event);

        if let Some(identity) = ctx.identity() {
            match self.deps.registry.try_begin(&identity, &execution_id).await {
                Ok(BeginOutcome::Started) => {}
                Ok(BeginOutcome::Duplicate {
                    execution_id: existing_execution_id,
                    state,
                }) => return self.duplicate(ctx, identity, existing_execution_id, state).await,
                Err(error) => {
                    log_error(
                        "workflow_orchestrator",
                        "try_begin",
                        &error.to_string(),
                        Some(&identity.to_string()),
                    );
                    let max = self.policies.policy_for(WorkflowState::Route).max_attempts;
                    return self
                        .fail_execution(ctx, WorkflowState::Route, error, 1, max, Vec::new())
                        .await;
                }
            }
        }

        self.run_execution(ctx).await
    }

    #[instrument(skip(self, ctx), fields(execution_id = %ctx.execution_id))]
    async fn run_execution(&self, mut ctx: ExecutionContext) -> ExecutionSummary {
        log_pipeline_operation(
            "execution_started",
            Some(&ctx.execution_id),
            ctx.identity_label().as_deref(),
            Some(WorkflowState::Route.as_str()),
            "started",
            None,
        );
        self.deps
            .event_publisher
            .publish(
                system_events::PIPELINE_EXECUTION_STARTED,
                json!({
                    "execution_id": ctx.execution_id,
                    "input": ctx.original_input,
                }),
            )
            .await;

        let mut notifications = Vec::new();
        let mut state = WorkflowState::Route;

        while !state.is_terminal() {
            self.enter_state(&ctx, state).await;

            let policy = self.policies.policy_for(state);
            let outcome = execute_with_retry(&policy, state.as_str(), |_attempt| {
                self.run_state(state, &ctx)
            })
            .await;
            ctx.record_attempts(state, outcome.attempts);

            let advanced = match outcome.result {
                Ok(output) => self.advance(&mut ctx, output, &mut notifications).await,
                Err(error) => Err(error),
            };

            match advanced {
                Ok(next) => {
                    debug!(from = %state, to = %next, attempts = outcome.attempts, "State complete");
                    state = next;
                }
                Err(error) => {
                    return self
                        .fail_execution(
                            ctx,
                            state,
                            error,
                            outcome.attempts,
                            policy.max_attempts,
                            notifications,
                        )
                        .await;
                }
            }
        }

        self.finish_registry(&ctx, WorkflowState::Complete).await;
        log_pipeline_operation(
            "execution_completed",
            Some(&ctx.execution_id),
            ctx.identity_label().as_deref(),
            Some(WorkflowState::Complete.as_str()),
            "completed",
            None,
        );
        self.deps
            .event_publisher
            .publish(
                system_events::PIPELINE_EXECUTION_COMPLETED,
                json!({
                    "execution_id": ctx.execution_id,
                    "points_written": ctx.load_report.as_ref().map(|r| r.points_written),
                }),
            )
            .await;

        ExecutionSummary {
            processing_path: ctx.routed.as_ref().map(|r| r.descriptor.processing_path()),
            execution_id: ctx.execution_id.clone(),
            identity: ctx.identity(),
            outcome: ExecutionOutcome::Completed,
            final_state: WorkflowState::Complete,
            state_attempts: ctx.attempts,
            load_report: ctx.load_report,
            notifications,
        }
    }

    async fn enter_state(&self, ctx: &ExecutionContext, state: WorkflowState) {
        if let Some(identity) = ctx.identity() {
            if let Err(error) = self
                .deps
                .registry
                .record_state(&identity, &ctx.execution_id, state)
                .await
            {
                warn!(state = %state, error = %error, "Failed to record execution state");
            }
        }
        self.deps
            .event_publisher
            .publish(
                system_events::PIPELINE_STATE_ENTERED,
                json!({ "execution_id": ctx.execution_id, "state": state }),
            )
            .await;
    }

    /// Invoke the executor behind `state`; called once per attempt
    async fn run_state(&self, state: WorkflowState, ctx: &ExecutionContext) -> Result<StateOutput> {
        match state {
            WorkflowState::Route => self.router.route(&ctx.event).map(StateOutput::Routed),
            WorkflowState::ProcessingChoice => {
                let routed = ctx.routed()?;
                Ok(StateOutput::PathChosen(routed.descriptor.processing_path()))
            }
            WorkflowState::ProcessInline | WorkflowState::ProcessBatchCompute => {
                let routed = ctx.routed()?;
                let path = match state {
                    WorkflowState::ProcessInline => ProcessingPath::Inline,
                    _ => ProcessingPath::BatchCompute,
                };
                let request = ProcessingRequest::from_descriptor(&ctx.execution_id, &routed.descriptor);
                self.deps
                    .processing_executor
                    .process(path, &request)
                    .await
                    .map(StateOutput::Processed)
            }
            WorkflowState::Load => {
                let routed = ctx.routed()?;
                let processing = ctx.processing()?;
                let rows = self
                    .deps
                    .row_reader
                    .read_rows(&processing.output_location)
                    .await?;
                let request =
                    LoadRequest::new(&ctx.execution_id, routed.file.dataset_type, rows)
                        .with_source_file(&routed.file.key);
                self.load_stage.run(request).await.map(StateOutput::Loaded)
            }
            WorkflowState::Index => {
                let routed = ctx.routed()?;
                let processing = ctx.processing()?;
                let request = IndexRequest {
                    execution_id: ctx.execution_id.clone(),
                    dataset_type: routed.file.dataset_type,
                    output_location: processing.output_location.clone(),
                    source_key: routed.file.key.clone(),
                    points_written: ctx.load_report.as_ref().map_or(0, |r| r.points_written),
                };
                self.deps.index_executor.index(&request).await?;
                Ok(StateOutput::Indexed)
            }
            WorkflowState::Complete | WorkflowState::NotifyFailure => Err(
                GridloadError::StateTransition(format!("terminal state {state} has no executor")),
            ),
        }
    }

    /// Merge a successful state output into context and pick the next state
    async fn advance(
        &self,
        ctx: &mut ExecutionContext,
        output: StateOutput,
        notifications: &mut Vec<NotificationEvent>,
    ) -> Result<WorkflowState> {
        let next = match output {
            StateOutput::Routed(routed) => {
                ctx.routed = Some(routed);
                WorkflowState::ProcessingChoice
            }
            StateOutput::PathChosen(ProcessingPath::Inline) => WorkflowState::ProcessInline,
            StateOutput::PathChosen(ProcessingPath::BatchCompute) => {
                WorkflowState::ProcessBatchCompute
            }
            StateOutput::Processed(outcome) => {
                debug!(rows = outcome.row_count, output = %outcome.output_location, "Processing finished");
                ctx.processing = Some(outcome);
                WorkflowState::Load
            }
            StateOutput::Loaded(report) => {
                let partial = report.is_partial();
                let manifest = report.manifest.clone();
                ctx.load_report = Some(report);

                if partial {
                    if self.load_stage.config().fail_on_partial {
                        return Err(GridloadError::validation(format!(
                            "load finished with {} failed points and {} rejected rows",
                            manifest.failed_points.len(),
                            manifest.rejected_rows.len()
                        )));
                    }
                    let event = NotificationEvent::partial_load(
                        &ctx.execution_id,
                        WorkflowState::Load.as_str(),
                        manifest,
                        ctx.original_input.clone(),
                    );
                    self.notify(&event).await;
                    notifications.push(event);
                }
                WorkflowState::Index
            }
            StateOutput::Indexed => WorkflowState::Complete,
        };
        Ok(next)
    }

    async fn fail_execution(
        &self,
        ctx: ExecutionContext,
        failing_state: WorkflowState,
        error: GridloadError,
        attempts: u32,
        max_attempts: u32,
        mut notifications: Vec<NotificationEvent>,
    ) -> ExecutionSummary {
        let error_context = ErrorContext::new(
            &ctx.execution_id,
            failing_state.as_str(),
            attempts,
            max_attempts,
        );
        let classification = self.deps.classifier.classify_error(&error, &error_context);

        let mut event = NotificationEvent::failure(
            NotificationKind::PipelineFailure,
            &ctx.execution_id,
            failing_state.as_str(),
            &classification,
            ctx.original_input.clone(),
        );
        if let Some(report) = &ctx.load_report {
            event = event.with_manifest(report.manifest.clone());
        }
        self.notify(&event).await;
        notifications.push(event);

        self.finish_registry(&ctx, WorkflowState::NotifyFailure).await;
        log_pipeline_operation(
            "execution_failed",
            Some(&ctx.execution_id),
            ctx.identity_label().as_deref(),
            Some(failing_state.as_str()),
            "notify_failure",
            Some(&error.to_string()),
        );
        self.deps
            .event_publisher
            .publish(
                system_events::PIPELINE_EXECUTION_FAILED,
                json!({
                    "execution_id": ctx.execution_id,
                    "failing_state": failing_state,
                    "error": error.to_string(),
                    "error_code": classification.error_code,
                    "attempts": attempts,
                }),
            )
            .await;

        ExecutionSummary {
            processing_path: ctx.routed.as_ref().map(|r| r.descriptor.processing_path()),
            execution_id: ctx.execution_id.clone(),
            identity: ctx.identity(),
            outcome: ExecutionOutcome::Failed {
                failing_state,
                error,
            },
            final_state: WorkflowState::NotifyFailure,
            state_attempts: ctx.attempts,
            load_report: ctx.load_report,
            notifications,
        }
    }

    async fn duplicate(
        &self,
        ctx: ExecutionContext,
        identity: FileIdentity,
        existing_execution_id: String,
        existing_state: WorkflowState,
    ) -> ExecutionSummary {
        info!(
            identity = %identity,
            existing_execution_id = %existing_execution_id,
            existing_state = %existing_state,
            "🔂 Duplicate event ignored"
        );
        self.deps
            .event_publisher
            .publish(
                system_events::PIPELINE_EXECUTION_DUPLICATE,
                json!({
                    "identity": identity.to_string(),
                    "existing_execution_id": existing_execution_id,
                    "existing_state": existing_state,
                }),
            )
            .await;

        ExecutionSummary {
            execution_id: ctx.execution_id,
            identity: Some(identity),
            final_state: existing_state,
            outcome: ExecutionOutcome::Duplicate {
                existing_execution_id,
                existing_state,
            },
            state_attempts: BTreeMap::new(),
            processing_path: None,
            load_report: None,
            notifications: Vec::new(),
        }
    }

    async fn finish_registry(&self, ctx: &ExecutionContext, state: WorkflowState) {
        if let Some(identity) = ctx.identity() {
            if let Err(error) = self
                .deps
                .registry
                .finish(&identity, &ctx.execution_id, state)
                .await
            {
                warn!(state = %state, error = %error, "Failed to record terminal execution state");
            }
        }
    }

    /// Notifier failures are logged; they never change the execution outcome
    async fn notify(&self, event: &NotificationEvent) {
        if let Err(error) = self.deps.notifier.notify(event).await {
            log_error(
                "workflow_orchestrator",
                "notify",
                &error.to_string(),
                Some(&event.execution_or_job_id),
            );
        }
    }
}

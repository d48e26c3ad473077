//! # Pipeline Orchestration
//!
//! Event-driven processing pipeline: one execution per uploaded object,
//! driven through a fixed state sequence with per-state retry policies.
//!
//! ## Core Components
//!
//! - **WorkflowOrchestrator**: the execution state machine and its failure path
//! - **ExecutionRegistry**: identity-keyed deduplication of redelivered events
//! - **ErrorClassifier**: turns errors into notification-ready classifications
//! - **Executors**: collaborator contracts for processing, row reading and indexing

pub mod context;
pub mod error_classifier;
pub mod execution_registry;
pub mod executors;
pub mod workflow_orchestrator;

pub use context::ExecutionContext;
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, ErrorContext, StandardErrorClassifier,
};
pub use execution_registry::{
    BeginOutcome, ExecutionRecord, ExecutionRegistry, InMemoryExecutionRegistry,
};
pub use executors::{IndexExecutor, IndexRequest, NoopIndexExecutor, ProcessingExecutor, RowReader};
pub use workflow_orchestrator::{
    ExecutionOutcome, ExecutionSummary, StateOutput, WorkflowDependencies, WorkflowOrchestrator,
};

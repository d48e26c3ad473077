#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, InfluxDB in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Gridload Core
//!
//! Orchestration core for energy-data ingestion: routing uploaded files to a
//! processing path, driving each file through a retrying pipeline into a
//! time-series store, and running long-lived historical migrations between
//! time-series backends.
//!
//! ## Architecture
//!
//! ```text
//! object-created event
//!        │
//!   ┌────▼────┐   ┌───────────────────────┐   ┌────────────┐
//!   │ Router  ├──►│ WorkflowOrchestrator  ├──►│ LoadStage  ├──► PointStore
//!   └─────────┘   │ (per-state retries)   │   └────────────┘        ▲
//!                 └──────────┬────────────┘                         │
//!                            │ NotifyFailure                        │
//!                            ▼                                      │
//!                        Notifier ◄──── MigrationOrchestrator ──────┘
//!                                       (JobStore, staging, rollback)
//! ```
//!
//! ## Module Organization
//!
//! - [`router`] - pure file classification into a processing descriptor
//! - [`orchestration`] - the pipeline execution state machine and its collaborators
//! - [`load`] - row-to-point mapping, batching, per-point fallback, failure manifest
//! - [`migration`] - migration jobs: job store, export, validation, load, rollback
//! - [`store`] - point-write API of the target store
//! - [`resilience`] - declarative retry policies and their interpreter
//! - [`state_machine`] - workflow states, migration statuses and transitions
//! - [`events`] - lifecycle event publisher and notifications
//! - [`config`] - YAML configuration with environment overlays
//! - [`error`] - the error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridload_core::config::GridloadConfig;
//! use gridload_core::router::Router;
//! use serde_json::json;
//!
//! # fn example() -> gridload_core::Result<()> {
//! let config = GridloadConfig::default();
//! let router = Router::new(config.router.clone());
//!
//! let event = serde_json::from_value(json!({
//!     "bucket": "raw-energy",
//!     "key": "uploads/generation_2024.csv",
//!     "size": 51200,
//!     "eTag": "abc123"
//! }))?;
//! let routed = router.route(&event)?;
//! println!("{:?}", routed.descriptor.processing_path());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod load;
pub mod logging;
pub mod migration;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod router;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, GridloadConfig};
pub use constants::events as system_events;
pub use error::{ErrorKind, GridloadError, Result};
pub use events::{EventPublisher, NotificationEvent, NotificationKind, Notifier};
pub use load::{FailureManifest, LoadReport, LoadStage};
pub use migration::{JobStore, MigrationDependencies, MigrationOrchestrator};
pub use models::{
    FileDescriptor, MigrationConfig, MigrationJob, ObjectCreatedEvent, ProcessingDescriptor,
    TimeSeriesPoint,
};
pub use orchestration::{
    ExecutionOutcome, ExecutionSummary, WorkflowDependencies, WorkflowOrchestrator,
};
pub use resilience::RetryPolicy;
pub use router::Router;
pub use state_machine::{MigrationStatus, WorkflowState};
pub use store::PointStore;

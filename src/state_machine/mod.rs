// State machine module for pipeline executions and migration jobs
//
// Transition tables are pure functions over (state, event); persistence and
// compare-and-set live with the owning orchestrator.

pub mod errors;
pub mod events;
pub mod migration_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::MigrationEvent;
pub use migration_state_machine::MigrationStateMachine;
pub use states::{MigrationStatus, WorkflowState};

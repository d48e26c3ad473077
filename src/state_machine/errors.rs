use thiserror::Error;

/// Errors raised while computing or applying a state transition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Concurrent modification detected for {entity_id}: expected {expected}, found {actual}")]
    ConcurrentModification {
        entity_id: String,
        expected: String,
        actual: String,
    },

    #[error("Entity {entity_id} is terminal in state {state}")]
    AlreadyTerminal { entity_id: String, state: String },

    #[error("Invalid state value: {0}")]
    InvalidState(String),

    #[error("Persistence operation failed: {reason}")]
    PersistenceFailed { reason: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

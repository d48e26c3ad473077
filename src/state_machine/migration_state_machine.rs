use super::{
    errors::{StateMachineError, StateMachineResult},
    events::MigrationEvent,
    states::MigrationStatus,
};
use crate::constants::events as system_events;
use crate::events::publisher::EventPublisher;
use crate::migration::job_store::JobStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Migration job state machine backed by a compare-and-set job store
///
/// The machine holds no state of its own: every transition re-reads the
/// durable status and applies the change with a conditional write, so any
/// number of orchestrator instances can drive the same job safely.
pub struct MigrationStateMachine {
    job_id: String,
    store: Arc<dyn JobStore>,
    event_publisher: EventPublisher,
}

impl MigrationStateMachine {
    /// Create a new migration state machine instance
    pub fn new(
        job_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            event_publisher,
        }
    }

    /// Get the current durable status of the job
    pub async fn current_state(&self) -> StateMachineResult<MigrationStatus> {
        let job = self
            .store
            .get(&self.job_id)
            .await
            .map_err(|e| StateMachineError::PersistenceFailed {
                reason: e.to_string(),
            })?;

        job.map(|j| j.status).ok_or_else(|| StateMachineError::PersistenceFailed {
            reason: format!("job {} not found", self.job_id),
        })
    }

    /// Attempt to transition the job from its current durable status
    pub async fn transition(&self, event: MigrationEvent) -> StateMachineResult<MigrationStatus> {
        let current_state = self.current_state().await?;
        self.transition_from(current_state, event).await
    }

    /// Attempt a transition that only applies if the job is still in `expected`
    pub async fn transition_from(
        &self,
        expected: MigrationStatus,
        event: MigrationEvent,
    ) -> StateMachineResult<MigrationStatus> {
        let target_state = Self::determine_target_state(expected, &event)?;

        let applied = self
            .store
            .compare_and_set_status(
                &self.job_id,
                expected,
                target_state,
                event.error_detail().map(str::to_string),
            )
            .await
            .map_err(|e| StateMachineError::PersistenceFailed {
                reason: e.to_string(),
            })?;

        if !applied {
            let actual = self.current_state().await?;
            warn!(
                job_id = %self.job_id,
                expected = %expected,
                actual = %actual,
                event = event.event_type(),
                "⚠️ Migration transition lost compare-and-set"
            );
            return Err(StateMachineError::ConcurrentModification {
                entity_id: self.job_id.clone(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        debug!(
            job_id = %self.job_id,
            from = %expected,
            to = %target_state,
            event = event.event_type(),
            "Migration job transitioned"
        );

        self.event_publisher
            .publish(
                system_events::MIGRATION_JOB_TRANSITIONED,
                serde_json::json!({
                    "job_id": self.job_id,
                    "from": expected,
                    "to": target_state,
                    "event": event.event_type(),
                    "error_detail": event.error_detail(),
                }),
            )
            .await;

        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: MigrationStatus,
        event: &MigrationEvent,
    ) -> StateMachineResult<MigrationStatus> {
        use MigrationEvent as E;
        use MigrationStatus as S;

        let target = match (current_state, event) {
            // Forward progress
            (S::Pending, E::StartExport) => S::Exporting,
            (S::Exporting, E::StartValidation) => S::Validating,
            (S::Exporting, E::StartLoading) => S::Loading,
            (S::Validating, E::StartLoading) => S::Loading,
            (S::Loading, E::Complete) => S::Completed,

            // Failure from any working state
            (S::Pending | S::Exporting | S::Validating | S::Loading, E::Fail(_)) => S::Failed,

            // Rollback
            (S::Failed, E::StartRollback) => S::RollingBack,
            (S::RollingBack, E::RollbackComplete) => S::RolledBack,
            (S::RollingBack, E::RollbackFailed(_)) => S::Failed,

            // Cancellation
            (S::Pending | S::Exporting | S::Validating | S::Loading, E::Cancel) => S::Cancelled,
            (S::Pending | S::Exporting | S::Validating | S::Loading, E::CancelWithRollback) => {
                S::RollingBack
            }

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

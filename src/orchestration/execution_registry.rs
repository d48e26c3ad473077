//! # Execution Registry
//!
//! Pipeline executions are keyed by file identity (bucket, key, eTag).
//! Delivery is at-least-once, so the registry is what makes a replayed
//! object-created event a no-op: a second `try_begin` for an identity whose
//! execution is still running, or already completed, is reported as a
//! duplicate. An identity whose last execution ended in `NotifyFailure` may
//! start again.
//!
//! Finished records are what deduplicates late redeliveries, so the
//! in-memory registry keeps them forever unless built with a retention
//! window. Past the window a finished identity counts as new again and
//! [`InMemoryExecutionRegistry::evict_expired`] may drop it.

use crate::error::Result;
use crate::models::FileIdentity;
use crate::state_machine::WorkflowState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub identity: FileIdentity,
    pub state: WorkflowState,
    pub attempts_started: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// Caller owns a fresh execution for the identity
    Started,
    /// Another execution already owns (or completed) the identity
    Duplicate {
        execution_id: String,
        state: WorkflowState,
    },
}

#[async_trait]
pub trait ExecutionRegistry: Send + Sync {
    /// Atomically claim `identity` for `execution_id`
    async fn try_begin(&self, identity: &FileIdentity, execution_id: &str) -> Result<BeginOutcome>;

    /// Record the state an execution has entered
    ///
    /// Updates from an execution that no longer owns the identity are ignored.
    async fn record_state(
        &self,
        identity: &FileIdentity,
        execution_id: &str,
        state: WorkflowState,
    ) -> Result<()>;

    async fn get(&self, identity: &FileIdentity) -> Result<Option<ExecutionRecord>>;

    /// Record the terminal state of an execution
    async fn finish(
        &self,
        identity: &FileIdentity,
        execution_id: &str,
        state: WorkflowState,
    ) -> Result<()> {
        debug_assert!(state.is_terminal());
        self.record_state(identity, execution_id, state).await
    }
}

/// Registry over a concurrent map; the entry API gives the atomic claim
#[derive(Debug, Default)]
pub struct InMemoryExecutionRegistry {
    executions: DashMap<FileIdentity, ExecutionRecord>,
    /// How long a finished execution keeps deduplicating; forever when unset
    retention: Option<chrono::Duration>,
}

impl InMemoryExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            executions: DashMap::new(),
            retention: chrono::Duration::from_std(retention).ok(),
        }
    }

    fn is_expired(&self, record: &ExecutionRecord, now: DateTime<Utc>) -> bool {
        let Some(retention) = self.retention else {
            return false;
        };
        record.state.is_terminal()
            && record
                .updated_at
                .checked_add_signed(retention)
                .is_some_and(|expires_at| expires_at <= now)
    }

    /// Drop finished records older than the retention window
    ///
    /// Returns how many were removed. Running executions are never evicted.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut evicted = 0;
        self.executions.retain(|_, record| {
            let expired = self.is_expired(record, now);
            if expired {
                evicted += 1;
            }
            !expired
        });
        if evicted > 0 {
            debug!(evicted, "Evicted finished executions past retention");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

#[async_trait]
impl ExecutionRegistry for InMemoryExecutionRegistry {
    async fn try_begin(&self, identity: &FileIdentity, execution_id: &str) -> Result<BeginOutcome> {
        let now = Utc::now();
        match self.executions.entry(identity.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(ExecutionRecord {
                    execution_id: execution_id.to_string(),
                    identity: identity.clone(),
                    state: WorkflowState::Route,
                    attempts_started: 1,
                    started_at: now,
                    updated_at: now,
                });
                Ok(BeginOutcome::Started)
            }
            Entry::Occupied(mut entry) => {
                let expired = self.is_expired(entry.get(), now);
                let record = entry.get_mut();
                if record.state == WorkflowState::NotifyFailure || expired {
                    debug!(
                        identity = %identity,
                        previous_execution = %record.execution_id,
                        previous_state = %record.state,
                        "Restarting identity after finished execution"
                    );
                    record.execution_id = execution_id.to_string();
                    record.state = WorkflowState::Route;
                    record.attempts_started += 1;
                    record.started_at = now;
                    record.updated_at = now;
                    Ok(BeginOutcome::Started)
                } else {
                    Ok(BeginOutcome::Duplicate {
                        execution_id: record.execution_id.clone(),
                        state: record.state,
                    })
                }
            }
        }
    }

    async fn record_state(
        &self,
        identity: &FileIdentity,
        execution_id: &str,
        state: WorkflowState,
    ) -> Result<()> {
        if let Some(mut record) = self.executions.get_mut(identity) {
            if record.execution_id == execution_id {
                record.state = state;
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn get(&self, identity: &FileIdentity) -> Result<Option<ExecutionRecord>> {
        Ok(self.executions.get(identity).map(|r| r.value().clone()))
    }
}

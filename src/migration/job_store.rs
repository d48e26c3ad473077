//! # Job Store
//!
//! Single source of truth for migration job state. Every status change is a
//! compare-and-set against the durable status, so several orchestrator
//! instances can drive jobs concurrently without in-process locking; only
//! one of two racing writers ever sees its transition applied.
//!
//! Status CAS alone cannot stop a second instance from re-driving a job that
//! is mid-export, since export itself does not change status. Work on a job
//! therefore also requires a [`JobClaim`]: an owner id with a lease that the
//! holder renews while it works and that others may only take over once it
//! has expired.

use crate::error::{GridloadError, Result};
use crate::models::{CancellationRequest, JobTransition, MigrationJob};
use crate::state_machine::MigrationStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

/// Result of a conditional create
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// A record with the same id already exists and was left untouched
    Existing(MigrationJob),
}

/// The instance currently allowed to drive a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobClaim {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl JobClaim {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Expiry of a lease taken at `now`
pub fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .ok_or_else(|| GridloadError::invalid_config(format!("claim lease {lease:?} is out of range")))
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `job` unless a record with its id exists
    async fn create_if_absent(&self, job: &MigrationJob) -> Result<CreateOutcome>;

    /// Move the job to `next` only if it is currently in `expected`
    ///
    /// Returns `false` when the current status differs. `error_detail`, when
    /// present, is appended to any detail already recorded.
    async fn compare_and_set_status(
        &self,
        job_id: &str,
        expected: MigrationStatus,
        next: MigrationStatus,
        error_detail: Option<String>,
    ) -> Result<bool>;

    /// Raise progress; lower values and updates to terminal jobs are ignored
    async fn update_progress(&self, job_id: &str, percentage: f64) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<MigrationJob>>;

    /// Record a durable cancel request; `false` if the job is not cancellable
    async fn request_cancellation(&self, job_id: &str, rollback: bool) -> Result<bool>;

    async fn cancellation(&self, job_id: &str) -> Result<Option<CancellationRequest>>;

    /// Audit trail ordered by sort key
    async fn transitions(&self, job_id: &str) -> Result<Vec<JobTransition>>;

    /// Take or renew the right to drive the job
    ///
    /// Succeeds when the job is unclaimed, already held by `owner`, or held
    /// under an expired lease. Returns `false` while another owner's lease is
    /// live.
    async fn try_claim(&self, job_id: &str, owner: &str, lease: Duration) -> Result<bool>;

    /// Extend the lease only if `owner` still holds the claim
    ///
    /// Unlike [`JobStore::try_claim`] this never re-acquires a claim that was
    /// released or taken over, so a task that lost its job cannot win it back.
    async fn renew_claim(&self, job_id: &str, owner: &str, lease: Duration) -> Result<bool>;

    /// Drop the claim if `owner` still holds it
    async fn release_claim(&self, job_id: &str, owner: &str) -> Result<()>;

    async fn claim(&self, job_id: &str) -> Result<Option<JobClaim>>;
}

/// Join an existing error detail with a new one
pub fn append_detail(existing: Option<&str>, detail: &str) -> String {
    match existing {
        Some(previous) if !previous.is_empty() => format!("{previous}; {detail}"),
        _ => detail.to_string(),
    }
}

pub(crate) fn clamp_progress(percentage: f64) -> f64 {
    if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    }
}

#[derive(Debug)]
struct JobEntry {
    job: MigrationJob,
    transitions: Vec<JobTransition>,
    cancellation: Option<CancellationRequest>,
    claim: Option<JobClaim>,
}

/// Job store held in process memory
///
/// All operations take one lock, which makes each of them atomic; it gives
/// the same compare-and-set guarantees as the PostgreSQL store within a
/// single process.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_if_absent(&self, job: &MigrationJob) -> Result<CreateOutcome> {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.get(&job.job_id) {
            return Ok(CreateOutcome::Existing(existing.job.clone()));
        }

        let creation = JobTransition {
            job_id: job.job_id.clone(),
            from_status: None,
            to_status: job.status,
            sort_key: 1,
            most_recent: true,
            metadata: json!({ "event": "create" }),
            created_at: Utc::now(),
        };
        jobs.insert(
            job.job_id.clone(),
            JobEntry {
                job: job.clone(),
                transitions: vec![creation],
                cancellation: None,
                claim: None,
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn compare_and_set_status(
        &self,
        job_id: &str,
        expected: MigrationStatus,
        next: MigrationStatus,
        error_detail: Option<String>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| GridloadError::not_found("migration job", job_id))?;

        if entry.job.status != expected {
            return Ok(false);
        }

        let now = Utc::now();
        entry.job.status = next;
        entry.job.updated_at = now;
        if let Some(detail) = &error_detail {
            entry.job.error_detail = Some(append_detail(entry.job.error_detail.as_deref(), detail));
        }
        if next == MigrationStatus::Completed {
            entry.job.progress_percentage = 100.0;
        }

        let sort_key = entry.transitions.last().map_or(0, |t| t.sort_key) + 1;
        for transition in &mut entry.transitions {
            transition.most_recent = false;
        }
        entry.transitions.push(JobTransition {
            job_id: job_id.to_string(),
            from_status: Some(expected),
            to_status: next,
            sort_key,
            most_recent: true,
            metadata: json!({ "error_detail": error_detail }),
            created_at: now,
        });
        Ok(true)
    }

    async fn update_progress(&self, job_id: &str, percentage: f64) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| GridloadError::not_found("migration job", job_id))?;

        let percentage = clamp_progress(percentage);
        if !entry.job.status.is_terminal() && percentage > entry.job.progress_percentage {
            entry.job.progress_percentage = percentage;
            entry.job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<MigrationJob>> {
        Ok(self.jobs.lock().get(job_id).map(|e| e.job.clone()))
    }

    async fn request_cancellation(&self, job_id: &str, rollback: bool) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| GridloadError::not_found("migration job", job_id))?;

        if !entry.job.status.is_cancellable() {
            return Ok(false);
        }
        // A rollback request is never downgraded by a later plain cancel
        let rollback = rollback || entry.cancellation.is_some_and(|c| c.rollback);
        entry.cancellation = Some(CancellationRequest { rollback });
        Ok(true)
    }

    async fn cancellation(&self, job_id: &str) -> Result<Option<CancellationRequest>> {
        Ok(self.jobs.lock().get(job_id).and_then(|e| e.cancellation))
    }

    async fn transitions(&self, job_id: &str) -> Result<Vec<JobTransition>> {
        Ok(self
            .jobs
            .lock()
            .get(job_id)
            .map(|e| e.transitions.clone())
            .unwrap_or_default())
    }

    async fn try_claim(&self, job_id: &str, owner: &str, lease: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = lease_expiry(now, lease)?;
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| GridloadError::not_found("migration job", job_id))?;

        if let Some(current) = &entry.claim {
            if current.owner != owner && current.is_live_at(now) {
                return Ok(false);
            }
        }
        entry.claim = Some(JobClaim {
            owner: owner.to_string(),
            expires_at,
        });
        Ok(true)
    }

    async fn renew_claim(&self, job_id: &str, owner: &str, lease: Duration) -> Result<bool> {
        let expires_at = lease_expiry(Utc::now(), lease)?;
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| GridloadError::not_found("migration job", job_id))?;

        match &mut entry.claim {
            Some(current) if current.owner == owner => {
                current.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, job_id: &str, owner: &str) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.claim.as_ref().is_some_and(|c| c.owner == owner) {
                entry.claim = None;
            }
        }
        Ok(())
    }

    async fn claim(&self, job_id: &str) -> Result<Option<JobClaim>> {
        Ok(self.jobs.lock().get(job_id).and_then(|e| e.claim.clone()))
    }
}

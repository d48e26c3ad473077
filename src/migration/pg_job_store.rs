//! # PostgreSQL Job Store
//!
//! Job records live in `gridload_migration_jobs`; every applied status
//! change appends a row to `gridload_migration_job_transitions` in the same
//! transaction, with a per-job `sort_key` and a `most_recent` flag.
//!
//! Conditional creation uses `INSERT .. ON CONFLICT DO NOTHING` and status
//! changes use `UPDATE .. WHERE status = $expected`, so concurrent
//! orchestrator instances race safely on the database rather than on any
//! in-process lock. Run claims follow the same pattern: the lease columns
//! are only written when the claim is free, expired or already ours, with
//! expiry judged by the database clock.

use super::job_store::{clamp_progress, CreateOutcome, JobClaim, JobStore};
use crate::error::{GridloadError, Result};
use crate::models::{
    CancellationRequest, DatasetType, JobTransition, MigrationJob, SourceSelector, TargetSelector,
};
use crate::state_machine::MigrationStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

/// Embedded schema migrations for the job store tables
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const TERMINAL_STATUSES: &[&str] = &["completed", "failed", "rolled_back", "cancelled"];
const CANCELLABLE_STATUSES: &[&str] = &["pending", "exporting", "validating", "loading"];

const SELECT_JOB: &str = r#"
    SELECT job_id, name, source_selector, target_selector, batch_size,
           validation_enabled, rollback_enabled, dataset_type, status,
           progress_percentage, error_detail, created_at, updated_at
    FROM gridload_migration_jobs
    WHERE job_id = $1
"#;

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool suitable for control-plane traffic
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("🗄️ Connected migration job store");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| GridloadError::JobStore(format!("schema migration failed: {e}")))
    }

    async fn exists(&self, job_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM gridload_migration_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn require_exists(&self, job_id: &str) -> Result<()> {
        if self.exists(job_id).await? {
            Ok(())
        } else {
            Err(GridloadError::not_found("migration job", job_id))
        }
    }
}

fn status_from_db(raw: &str) -> Result<MigrationStatus> {
    raw.parse::<MigrationStatus>().map_err(GridloadError::JobStore)
}

fn job_from_row(row: &PgRow) -> Result<MigrationJob> {
    let source_selector: Value = row.try_get("source_selector")?;
    let target_selector: Value = row.try_get("target_selector")?;
    let dataset_type: String = row.try_get("dataset_type")?;
    let status: String = row.try_get("status")?;
    let batch_size: i32 = row.try_get("batch_size")?;

    Ok(MigrationJob {
        job_id: row.try_get("job_id")?,
        name: row.try_get("name")?,
        source_selector: serde_json::from_value::<SourceSelector>(source_selector)?,
        target_selector: serde_json::from_value::<TargetSelector>(target_selector)?,
        batch_size: usize::try_from(batch_size)
            .map_err(|_| GridloadError::JobStore(format!("invalid batch size {batch_size}")))?,
        validation_enabled: row.try_get("validation_enabled")?,
        rollback_enabled: row.try_get("rollback_enabled")?,
        dataset_type: serde_json::from_value::<DatasetType>(Value::String(dataset_type))?,
        status: status_from_db(&status)?,
        progress_percentage: row.try_get("progress_percentage")?,
        error_detail: row.try_get("error_detail")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_if_absent(&self, job: &MigrationJob) -> Result<CreateOutcome> {
        let batch_size = i32::try_from(job.batch_size)
            .map_err(|_| GridloadError::invalid_config("batch size does not fit the job store"))?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO gridload_migration_jobs
                (job_id, name, source_selector, target_selector, batch_size,
                 validation_enabled, rollback_enabled, dataset_type, status,
                 progress_percentage, error_detail, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.name)
        .bind(serde_json::to_value(&job.source_selector)?)
        .bind(serde_json::to_value(&job.target_selector)?)
        .bind(batch_size)
        .bind(job.validation_enabled)
        .bind(job.rollback_enabled)
        .bind(job.dataset_type.as_str())
        .bind(job.status.as_str())
        .bind(job.progress_percentage)
        .bind(&job.error_detail)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            let existing = self.get(&job.job_id).await?.ok_or_else(|| {
                GridloadError::JobStore(format!(
                    "job {} conflicted on insert but could not be read",
                    job.job_id
                ))
            })?;
            return Ok(CreateOutcome::Existing(existing));
        }

        sqlx::query(
            r#"
            INSERT INTO gridload_migration_job_transitions
                (job_id, from_status, to_status, sort_key, most_recent, metadata)
            VALUES ($1, NULL, $2, 1, true, $3)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.status.as_str())
        .bind(json!({ "event": "create" }))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(job_id = %job.job_id, "Migration job record created");
        Ok(CreateOutcome::Created)
    }

    async fn compare_and_set_status(
        &self,
        job_id: &str,
        expected: MigrationStatus,
        next: MigrationStatus,
        error_detail: Option<String>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let applied = sqlx::query(
            r#"
            UPDATE gridload_migration_jobs
            SET status = $3,
                updated_at = NOW(),
                error_detail = CASE
                    WHEN $4::TEXT IS NULL THEN error_detail
                    WHEN error_detail IS NULL OR error_detail = '' THEN $4::TEXT
                    ELSE error_detail || '; ' || $4::TEXT
                END,
                progress_percentage = CASE
                    WHEN $3 = 'completed' THEN 100.0
                    ELSE progress_percentage
                END
            WHERE job_id = $1 AND status = $2
            "#,
        )
        .bind(job_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(&error_detail)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if applied == 0 {
            tx.rollback().await?;
            self.require_exists(job_id).await?;
            return Ok(false);
        }

        // The row lock taken by the UPDATE serializes sort key allocation
        let sort_key: i32 = sqlx::query(
            "SELECT COALESCE(MAX(sort_key), 0) + 1 AS next_key FROM gridload_migration_job_transitions WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("next_key")?;

        sqlx::query(
            "UPDATE gridload_migration_job_transitions SET most_recent = false WHERE job_id = $1 AND most_recent = true",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO gridload_migration_job_transitions
                (job_id, from_status, to_status, sort_key, most_recent, metadata)
            VALUES ($1, $2, $3, $4, true, $5)
            "#,
        )
        .bind(job_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(sort_key)
        .bind(json!({ "error_detail": error_detail }))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn update_progress(&self, job_id: &str, percentage: f64) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE gridload_migration_jobs
            SET progress_percentage = $2, updated_at = NOW()
            WHERE job_id = $1
              AND progress_percentage < $2
              AND NOT (status = ANY($3))
            "#,
        )
        .bind(job_id)
        .bind(clamp_progress(percentage))
        .bind(TERMINAL_STATUSES)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            self.require_exists(job_id).await?;
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<MigrationJob>> {
        let row = sqlx::query(SELECT_JOB)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn request_cancellation(&self, job_id: &str, rollback: bool) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE gridload_migration_jobs
            SET cancel_requested = true,
                cancel_rollback = cancel_rollback OR $2,
                updated_at = NOW()
            WHERE job_id = $1 AND status = ANY($3)
            "#,
        )
        .bind(job_id)
        .bind(rollback)
        .bind(CANCELLABLE_STATUSES)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            self.require_exists(job_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn cancellation(&self, job_id: &str) -> Result<Option<CancellationRequest>> {
        let row = sqlx::query(
            "SELECT cancel_requested, cancel_rollback FROM gridload_migration_jobs WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let requested: bool = row.try_get("cancel_requested")?;
                let rollback: bool = row.try_get("cancel_rollback")?;
                Ok(requested.then_some(CancellationRequest { rollback }))
            }
            None => Ok(None),
        }
    }

    async fn transitions(&self, job_id: &str) -> Result<Vec<JobTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, from_status, to_status, sort_key, most_recent, metadata, created_at
            FROM gridload_migration_job_transitions
            WHERE job_id = $1
            ORDER BY sort_key ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<JobTransition> {
                let from_status: Option<String> = row.try_get("from_status")?;
                let to_status: String = row.try_get("to_status")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                Ok(JobTransition {
                    job_id: row.try_get("job_id")?,
                    from_status: from_status.as_deref().map(status_from_db).transpose()?,
                    to_status: status_from_db(&to_status)?,
                    sort_key: row.try_get("sort_key")?,
                    most_recent: row.try_get("most_recent")?,
                    metadata: row.try_get("metadata")?,
                    created_at,
                })
            })
            .collect()
    }

    async fn try_claim(&self, job_id: &str, owner: &str, lease: Duration) -> Result<bool> {
        let claimed = sqlx::query(
            r#"
            UPDATE gridload_migration_jobs
            SET claim_owner = $2,
                claim_expires_at = NOW() + ($3 * INTERVAL '1 millisecond')
            WHERE job_id = $1
              AND (claim_owner IS NULL
                   OR claim_owner = $2
                   OR claim_expires_at IS NULL
                   OR claim_expires_at <= NOW())
            "#,
        )
        .bind(job_id)
        .bind(owner)
        .bind(lease.as_millis() as f64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if claimed == 0 {
            self.require_exists(job_id).await?;
            debug!(job_id, owner, "Claim held by another instance");
            return Ok(false);
        }
        Ok(true)
    }

    async fn renew_claim(&self, job_id: &str, owner: &str, lease: Duration) -> Result<bool> {
        let renewed = sqlx::query(
            r#"
            UPDATE gridload_migration_jobs
            SET claim_expires_at = NOW() + ($3 * INTERVAL '1 millisecond')
            WHERE job_id = $1 AND claim_owner = $2
            "#,
        )
        .bind(job_id)
        .bind(owner)
        .bind(lease.as_millis() as f64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if renewed == 0 {
            self.require_exists(job_id).await?;
        }
        Ok(renewed > 0)
    }

    async fn release_claim(&self, job_id: &str, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE gridload_migration_jobs
            SET claim_owner = NULL, claim_expires_at = NULL
            WHERE job_id = $1 AND claim_owner = $2
            "#,
        )
        .bind(job_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim(&self, job_id: &str) -> Result<Option<JobClaim>> {
        let row = sqlx::query(
            "SELECT claim_owner, claim_expires_at FROM gridload_migration_jobs WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let owner: Option<String> = row.try_get("claim_owner")?;
        let expires_at: Option<DateTime<Utc>> = row.try_get("claim_expires_at")?;
        Ok(owner.zip(expires_at).map(|(owner, expires_at)| JobClaim { owner, expires_at }))
    }
}

//! PostgreSQL implementation of the patrol-core job orchestration traits.
//!
//! Provides `PgJobStore` (the `JobStore` + `Waiter` backend), `PgScheduleStore`
//! (the `ScheduleStore` backend used by the Scheduler), and `PgSiteNameLookup`
//! (the enrichment lookup consumed by the Job Service on terminal failure).
//!
//! # Database schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id UUID PRIMARY KEY,
//!     job_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     metadata JSONB,
//!
//!     status TEXT NOT NULL DEFAULT 'pending',
//!     retry_count INTEGER NOT NULL DEFAULT 0,
//!     max_retries INTEGER NOT NULL DEFAULT 3,
//!     last_error TEXT,
//!     completed_at TIMESTAMPTZ,
//!
//!     priority INTEGER NOT NULL DEFAULT 0,
//!     scheduled_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!
//!     worker_id TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!
//!     session_id UUID,
//!     site_id UUID,
//!     source_id UUID,
//!     is_test BOOLEAN NOT NULL DEFAULT FALSE
//! );
//!
//! CREATE INDEX idx_jobs_reserve ON jobs (job_type, priority DESC, scheduled_at ASC, created_at ASC, id ASC)
//!     WHERE status = 'pending';
//! CREATE INDEX idx_jobs_lease ON jobs (lease_expires_at)
//!     WHERE status = 'running' AND lease_expires_at IS NOT NULL;
//! CREATE INDEX idx_jobs_source ON jobs (source_id, created_at DESC) WHERE source_id IS NOT NULL;
//! CREATE INDEX idx_jobs_site ON jobs (site_id, created_at DESC) WHERE site_id IS NOT NULL;
//!
//! CREATE TABLE scheduled_tasks (
//!     id UUID PRIMARY KEY,
//!     task_name TEXT NOT NULL UNIQUE,
//!     interval_seconds BIGINT NOT NULL,
//!     last_queued_at TIMESTAMPTZ,
//!     active_fire_key TEXT,
//!     active_fire_key_set_at TIMESTAMPTZ,
//!     job_type TEXT NOT NULL,
//!     overrun_policy TEXT NOT NULL DEFAULT 'skip'
//! );
//! ```
//!
//! Every mutating `JobStore` method is a conditional `UPDATE ... WHERE status = $expected`,
//! which is what makes `complete`/`fail` idempotent under concurrent or duplicate calls.
//! `reserve_next` uses `FOR UPDATE SKIP LOCKED` inside a CTE so competing workers never
//! block each other on the same candidate row.

mod listener;
mod schedule;
mod site;

pub use listener::PgWaiter;
pub use schedule::PgScheduleStore;
pub use site::PgSiteNameLookup;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patrol_core::model::{CreateJobRequest, Job, JobStatus, JobType, JobTypeStats};
use patrol_core::store::{
    FailOutcome, JobStore, JobWithSiteName, ListBySiteOpts, ListBySourceOpts, ListOpts,
};
use patrol_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_job(row: &PgRow) -> anyhow::Result<Job> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type: JobType::from_str(&job_type).map_err(|e| anyhow::anyhow!(e))?,
        priority: row.try_get("priority")?,
        scheduled_at: row.try_get("scheduled_at")?,
        created_at: row.try_get("created_at")?,
        status: JobStatus::from_str(&status).map_err(|e| anyhow::anyhow!(e))?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        last_error: row.try_get("last_error")?,
        completed_at: row.try_get("completed_at")?,
        payload: row.try_get("payload")?,
        metadata: row.try_get("metadata")?,
        session_id: row.try_get("session_id")?,
        site_id: row.try_get("site_id")?,
        source_id: row.try_get("source_id")?,
        is_test: row.try_get("is_test")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        worker_id: row.try_get("worker_id")?,
    })
}

const JOB_COLUMNS: &str = "id, job_type, payload, metadata, status, retry_count, max_retries, \
    last_error, completed_at, priority, scheduled_at, created_at, worker_id, lease_expires_at, \
    session_id, site_id, source_id, is_test";

#[async_trait]
impl JobStore for PgJobStore {
    #[tracing::instrument(skip(self, req), fields(job_type = %req.job_type))]
    async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let scheduled_at = req.scheduled_at.map(|s| s.max(now)).unwrap_or(now);
        let priority = req.priority.unwrap_or(patrol_core::model::DEFAULT_PRIORITY);
        let max_retries = req.max_retries.unwrap_or(patrol_core::model::DEFAULT_MAX_RETRIES);

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (id, job_type, payload, metadata, status, retry_count, max_retries,
                priority, scheduled_at, created_at, session_id, site_id, source_id, is_test)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(req.job_type.as_str())
        .bind(&req.payload)
        .bind(&req.metadata)
        .bind(max_retries)
        .bind(priority)
        .bind(scheduled_at)
        .bind(now)
        .bind(req.session_id)
        .bind(req.site_id)
        .bind(req.source_id)
        .bind(req.is_test)
        .fetch_one(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(req.job_type.notify_channel())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        row_to_job(&row).map_err(Error::Store)
    }

    #[tracing::instrument(skip(self))]
    async fn reserve_next(&self, job_type: JobType, lease_secs: u32, worker_id: &str) -> Result<Option<Job>> {
        let lease_expires_at = Utc::now() + chrono::Duration::seconds(lease_secs as i64);

        let row = sqlx::query(&format!(
            r#"
            WITH candidate AS (
                SELECT id
                FROM jobs
                WHERE job_type = $1
                  AND status = 'pending'
                  AND scheduled_at <= NOW()
                ORDER BY priority DESC, scheduled_at ASC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running', worker_id = $2, lease_expires_at = $3
            WHERE id IN (SELECT id FROM candidate)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_type.as_str())
        .bind(worker_id)
        .bind(lease_expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        row.as_ref().map(row_to_job).transpose().map_err(Error::Store)
    }

    #[tracing::instrument(skip(self))]
    async fn heartbeat(&self, id: Uuid, extend_secs: u32) -> Result<bool> {
        let lease_expires_at = Utc::now() + chrono::Duration::seconds(extend_secs as i64);

        let result = sqlx::query(
            "UPDATE jobs SET lease_expires_at = $1 WHERE id = $2 AND status = 'running'",
        )
        .bind(lease_expires_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn complete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = NOW(), lease_expires_at = NULL, worker_id = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(result.rows_affected() == 1)
    }

    /// `retry_count` is incremented on every call that finds a running job,
    /// whether the outcome is a retry or terminal — the post-increment value
    /// is what decides terminality and what callers see afterward.
    #[tracing::instrument(skip(self, err_msg))]
    async fn fail(&self, id: Uuid, err_msg: &str) -> Result<FailOutcome> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET retry_count = retry_count + 1,
                last_error = $2,
                worker_id = NULL,
                lease_expires_at = NULL,
                status = CASE
                    WHEN max_retries = 0 OR retry_count + 1 >= max_retries THEN 'failed'
                    ELSE 'pending'
                END,
                completed_at = CASE
                    WHEN max_retries = 0 OR retry_count + 1 >= max_retries THEN NOW()
                    ELSE NULL
                END
            WHERE id = $1 AND status = 'running'
            RETURNING status, retry_count
            "#,
        )
        .bind(id)
        .bind(err_msg)
        .fetch_optional(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        let Some(row) = row else {
            return Ok(FailOutcome::NoChange);
        };

        let status: String = row.try_get("status").map_err(anyhow::Error::from)?;
        let retry_count: i32 = row.try_get("retry_count").map_err(anyhow::Error::from)?;

        Ok(if status == "failed" {
            FailOutcome::Terminal { retry_count }
        } else {
            FailOutcome::Retried { retry_count }
        })
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        row.as_ref().map(row_to_job).transpose().map_err(Error::Store)
    }

    async fn stats(&self, job_type: JobType) -> Result<JobTypeStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM jobs
            WHERE job_type = $1
            "#,
        )
        .bind(job_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(JobTypeStats {
            pending: row.try_get("pending").map_err(anyhow::Error::from)?,
            running: row.try_get("running").map_err(anyhow::Error::from)?,
            completed: row.try_get("completed").map_err(anyhow::Error::from)?,
            failed: row.try_get("failed").map_err(anyhow::Error::from)?,
        })
    }

    async fn list_recent_by_type(&self, job_type: JobType, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_type = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(job_type.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        rows.iter().map(row_to_job).collect::<anyhow::Result<_>>().map_err(Error::Store)
    }

    async fn list_by_source(&self, opts: ListBySourceOpts) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE source_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(opts.source_id)
        .bind(opts.page.limit)
        .bind(opts.page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        rows.iter().map(row_to_job).collect::<anyhow::Result<_>>().map_err(Error::Store)
    }

    async fn list_by_site(&self, opts: ListBySiteOpts) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE site_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(opts.site_id)
        .bind(opts.page.limit)
        .bind(opts.page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        rows.iter().map(row_to_job).collect::<anyhow::Result<_>>().map_err(Error::Store)
    }

    async fn list(&self, opts: ListOpts) -> Result<Vec<JobWithSiteName>> {
        let rows = if let Some(job_type) = opts.job_type {
            sqlx::query(&format!(
                r#"
                SELECT j.*, s.name AS site_name
                FROM jobs j
                LEFT JOIN sites s ON s.id = j.site_id
                WHERE j.job_type = $1
                ORDER BY j.created_at DESC
                LIMIT $2 OFFSET $3
                "#
            ))
            .bind(job_type.as_str())
            .bind(opts.page.limit)
            .bind(opts.page.offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT j.*, s.name AS site_name
                FROM jobs j
                LEFT JOIN sites s ON s.id = j.site_id
                ORDER BY j.created_at DESC
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(opts.page.limit)
            .bind(opts.page.offset)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(anyhow::Error::from)?;

        rows.iter()
            .map(|row| {
                let job = row_to_job(row)?;
                let site_name: Option<String> = row.try_get("site_name")?;
                Ok(JobWithSiteName { job, site_name })
            })
            .collect::<anyhow::Result<_>>()
            .map_err(Error::Store)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = $1 AND status = 'pending' AND lease_expires_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let expired_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE status = 'running' AND lease_expires_at < $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        for id in &expired_ids {
            self.fail(*id, "lease expired").await?;
        }

        Ok(expired_ids)
    }

    async fn purge_terminal(&self, older_than: DateTime<Utc>, is_test: bool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed')
              AND is_test = $1
              AND completed_at < $2
            "#,
        )
        .bind(is_test)
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(result.rows_affected())
    }
}

// `reap_expired_leases` runs its ids through the ordinary `fail` path rather
// than a bespoke bulk UPDATE, so the retry-count-always-increments rule and
// the Terminal/Retried split stay in exactly one place.

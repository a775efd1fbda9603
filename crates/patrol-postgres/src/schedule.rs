//! `ScheduleStore` backend for the Scheduler (C6) against the
//! `scheduled_tasks` table.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patrol_core::model::{JobStatus, JobType, OverrunPolicy, ScheduledTask};
use patrol_core::scheduler::ScheduleStore;
use patrol_core::{Error, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_overrun_policy(s: &str) -> OverrunPolicy {
    match s {
        "queue" => OverrunPolicy::Queue,
        _ => OverrunPolicy::Skip,
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn due_tasks(&self, _now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_name, interval_seconds, last_queued_at, active_fire_key,
                   active_fire_key_set_at, job_type, overrun_policy
            FROM scheduled_tasks
            WHERE last_queued_at IS NULL
               OR last_queued_at <= NOW() - (interval_seconds || ' seconds')::interval
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        rows.into_iter()
            .map(|row| {
                let job_type: String = row.try_get("job_type")?;
                let overrun_policy: String = row.try_get("overrun_policy")?;
                let interval_seconds: i64 = row.try_get("interval_seconds")?;

                Ok(ScheduledTask {
                    id: row.try_get("id")?,
                    task_name: row.try_get("task_name")?,
                    interval: chrono::Duration::seconds(interval_seconds),
                    last_queued_at: row.try_get("last_queued_at")?,
                    active_fire_key: row.try_get("active_fire_key")?,
                    active_fire_key_set_at: row.try_get("active_fire_key_set_at")?,
                    job_type: JobType::from_str(&job_type).map_err(|e| anyhow::anyhow!(e))?,
                    overrun_policy: parse_overrun_policy(&overrun_policy),
                    overrun_states: vec![JobStatus::Pending, JobStatus::Running],
                })
            })
            .collect::<anyhow::Result<_>>()
            .map_err(Error::Store)
    }

    async fn mark_queued(&self, task_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scheduled_tasks SET last_queued_at = $1 WHERE id = $2")
            .bind(at)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn set_active_fire_key(&self, task_id: Uuid, fire_key: Option<String>) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_tasks SET active_fire_key = $1, active_fire_key_set_at = NOW() WHERE id = $2",
        )
        .bind(fire_key)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn fire_key_job_statuses(&self, task_id: Uuid) -> Result<Vec<JobStatus>> {
        let row = sqlx::query("SELECT active_fire_key FROM scheduled_tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        let Some(row) = row else { return Ok(vec![]) };
        let fire_key: Option<String> = row.try_get("active_fire_key").map_err(anyhow::Error::from)?;
        let Some(fire_key) = fire_key else { return Ok(vec![]) };

        let statuses: Vec<String> = sqlx::query_scalar(
            "SELECT status FROM jobs WHERE payload->>'fire_key' = $1",
        )
        .bind(fire_key)
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        statuses
            .iter()
            .map(|s| JobStatus::from_str(s))
            .collect::<std::result::Result<_, _>>()
    }
}

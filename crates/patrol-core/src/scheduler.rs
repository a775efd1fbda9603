//! Periodic materialization of `ScheduledTask` rows into jobs (`spec.md`
//! §4.6, C6).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{CreateJobRequest, JobStatus, OverrunPolicy, ScheduledTask};
use crate::store::JobStore;
use crate::Result;

const TICK_INTERVAL: StdDuration = StdDuration::from_secs(5);

/// Storage seam for scheduled tasks. Kept separate from `JobStore` since the
/// two tables have unrelated lifecycles and access patterns.
#[async_trait::async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn due_tasks(&self, now: chrono::DateTime<Utc>) -> Result<Vec<ScheduledTask>>;
    async fn mark_queued(&self, task_id: Uuid, at: chrono::DateTime<Utc>) -> Result<()>;
    async fn set_active_fire_key(&self, task_id: Uuid, fire_key: Option<String>) -> Result<()>;
    /// Current status of every job minted under the task's active fire key.
    async fn fire_key_job_statuses(&self, task_id: Uuid) -> Result<Vec<JobStatus>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    pub considered: u32,
    pub queued: u32,
    pub skipped_overrun: u32,
}

pub struct Scheduler {
    schedule_store: Arc<dyn ScheduleStore>,
    job_store: Arc<dyn JobStore>,
}

impl Scheduler {
    pub fn new(schedule_store: Arc<dyn ScheduleStore>, job_store: Arc<dyn JobStore>) -> Self {
        Self { schedule_store, job_store }
    }

    /// Runs the tick loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    match self.tick(Utc::now()).await {
                        Ok(report) => {
                            if report.queued > 0 || report.skipped_overrun > 0 {
                                tracing::info!(
                                    considered = report.considered,
                                    queued = report.queued,
                                    skipped_overrun = report.skipped_overrun,
                                    "scheduler tick"
                                );
                            }
                        }
                        Err(err) => tracing::error!(error = %err, "scheduler tick failed"),
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// One pass over due tasks. Exposed separately from `run` so tests can
    /// drive it deterministically without waiting on the tick interval.
    pub async fn tick(&self, now: chrono::DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        for task in self.schedule_store.due_tasks(now).await? {
            if !task.is_due(now) {
                continue;
            }
            report.considered += 1;

            if task.active_fire_key.is_some() && self.overrun_active(&task).await? {
                match task.overrun_policy {
                    OverrunPolicy::Skip => {
                        tracing::warn!(task = %task.task_name, "overrun, skipping this tick");
                        report.skipped_overrun += 1;
                        self.schedule_store.mark_queued(task.id, now).await?;
                        continue;
                    }
                    OverrunPolicy::Queue => {
                        tracing::warn!(task = %task.task_name, "overrun, queuing anyway");
                    }
                }
            }

            self.fire(&task, now).await?;
            report.queued += 1;
        }

        Ok(report)
    }

    /// True if any job minted under the task's active fire key is in one of
    /// `task.overrun_states`.
    async fn overrun_active(&self, task: &ScheduledTask) -> Result<bool> {
        let statuses = self.schedule_store.fire_key_job_statuses(task.id).await?;
        Ok(statuses.iter().any(|s| task.overrun_states.contains(s)))
    }

    async fn fire(&self, task: &ScheduledTask, now: chrono::DateTime<Utc>) -> Result<()> {
        // v7 is time-ordered, which makes fire keys useful as an audit trail
        // ordering key in addition to their role as a batch identifier.
        let fire_key = Uuid::now_v7().to_string();

        self.job_store
            .create(CreateJobRequest {
                job_type: task.job_type,
                payload: serde_json::json!({ "scheduled_task_id": task.id, "fire_key": fire_key }),
                priority: None,
                metadata: None,
                scheduled_at: Some(now),
                max_retries: None,
                session_id: None,
                site_id: None,
                source_id: None,
                is_test: false,
            })
            .await?;

        self.schedule_store.set_active_fire_key(task.id, Some(fire_key)).await?;
        self.schedule_store.mark_queued(task.id, now).await?;
        Ok(())
    }
}

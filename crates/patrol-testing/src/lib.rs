//! In-memory `JobStore` and `Waiter` fakes used to exercise `patrol-core`'s
//! service/runner/scheduler/reaper logic without a database, plus a handful
//! of fixture builders.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use patrol_core::model::{
    CreateJobRequest, Job, JobStatus, JobType, JobTypeStats, PageOpts, DEFAULT_MAX_RETRIES,
    DEFAULT_PRIORITY,
};
use patrol_core::store::{
    FailOutcome, JobStore, JobWithSiteName, ListBySiteOpts, ListBySourceOpts, ListOpts, Waiter,
};
use patrol_core::Result;

/// An in-process stand-in for the Postgres `LISTEN`/`NOTIFY` bridge.
/// Tests call `notify()` directly instead of going through a database.
pub struct InMemoryWaiter {
    notifies: DashMap<JobType, Arc<tokio::sync::Notify>>,
}

impl Default for InMemoryWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWaiter {
    pub fn new() -> Self {
        Self { notifies: DashMap::new() }
    }

    fn notify_handle(&self, job_type: JobType) -> Arc<tokio::sync::Notify> {
        self.notifies
            .entry(job_type)
            .or_insert_with(|| Arc::new(tokio::sync::Notify::new()))
            .clone()
    }

    /// Wake any task currently blocked in `wait_for_notification` for this type.
    pub fn notify(&self, job_type: JobType) {
        self.notify_handle(job_type).notify_one();
    }
}

#[async_trait]
impl Waiter for InMemoryWaiter {
    async fn wait_for_notification(&self, job_type: JobType, cancel: &CancellationToken) {
        let notify = self.notify_handle(job_type);
        tokio::select! {
            _ = notify.notified() => {}
            _ = cancel.cancelled() => {}
        }
    }
}

/// In-memory `JobStore`. Implements the same conditional-transition and
/// ordering rules the Postgres store enforces with SQL, so tests exercise
/// real business logic, not a simplified stand-in.
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self { jobs: Mutex::new(HashMap::new()) }
    }

    async fn fail_locked(jobs: &mut HashMap<Uuid, Job>, id: Uuid, err_msg: &str) -> FailOutcome {
        let Some(job) = jobs.get_mut(&id) else {
            return FailOutcome::NoChange;
        };
        if job.status != JobStatus::Running {
            return FailOutcome::NoChange;
        }

        let new_retry_count = job.retry_count + 1;
        let terminal = job.max_retries == 0 || new_retry_count >= job.max_retries;

        job.retry_count = new_retry_count;
        job.last_error = Some(err_msg.to_string());
        job.lease_expires_at = None;
        job.worker_id = None;

        if terminal {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            FailOutcome::Terminal { retry_count: new_retry_count }
        } else {
            job.status = JobStatus::Pending;
            FailOutcome::Retried { retry_count: new_retry_count }
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: req.job_type,
            priority: req.priority.unwrap_or(DEFAULT_PRIORITY),
            scheduled_at: req.scheduled_at.map(|s| s.max(now)).unwrap_or(now),
            created_at: now,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            last_error: None,
            completed_at: None,
            payload: req.payload,
            metadata: req.metadata,
            session_id: req.session_id,
            site_id: req.site_id,
            source_id: req.source_id,
            is_test: req.is_test,
            lease_expires_at: None,
            worker_id: None,
        };

        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn reserve_next(
        &self,
        job_type: JobType,
        lease_secs: u32,
        worker_id: &str,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        let candidate_id = jobs
            .values()
            .filter(|j| {
                j.job_type == job_type
                    && j.status == JobStatus::Pending
                    && j.scheduled_at <= now
                    && j.lease_expires_at.map(|l| l <= now).unwrap_or(true)
            })
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.scheduled_at.cmp(&b.scheduled_at))
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|j| j.id);

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).unwrap();
        job.status = JobStatus::Running;
        job.lease_expires_at = Some(now + chrono::Duration::seconds(lease_secs as i64));
        job.worker_id = Some(worker_id.to_string());

        Ok(Some(job.clone()))
    }

    async fn heartbeat(&self, id: Uuid, extend_secs: u32) -> Result<bool> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.lease_expires_at = Some(now + chrono::Duration::seconds(extend_secs as i64));
        Ok(true)
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.lease_expires_at = None;
        job.worker_id = None;
        Ok(true)
    }

    async fn fail(&self, id: Uuid, err_msg: &str) -> Result<FailOutcome> {
        let mut jobs = self.jobs.lock().await;
        Ok(Self::fail_locked(&mut jobs, id, err_msg).await)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn stats(&self, job_type: JobType) -> Result<JobTypeStats> {
        let jobs = self.jobs.lock().await;
        let mut stats = JobTypeStats::default();
        for job in jobs.values().filter(|j| j.job_type == job_type) {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn list_recent_by_type(&self, job_type: JobType, limit: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.job_type == job_type).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn list_by_source(&self, opts: ListBySourceOpts) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.source_id == Some(opts.source_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matching, opts.page))
    }

    async fn list_by_site(&self, opts: ListBySiteOpts) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.site_id == Some(opts.site_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matching, opts.page))
    }

    async fn list(&self, opts: ListOpts) -> Result<Vec<JobWithSiteName>> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| opts.job_type.map(|t| t == j.job_type).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matching, opts.page)
            .into_iter()
            .map(|job| JobWithSiteName { job, site_name: None })
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending || job.lease_expires_at.is_some() {
            return Ok(false);
        }
        jobs.remove(&id);
        Ok(true)
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut jobs = self.jobs.lock().await;
        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.lease_expires_at.map(|l| l < now).unwrap_or(false))
            .map(|j| j.id)
            .collect();

        for id in &expired {
            Self::fail_locked(&mut jobs, *id, "lease expired").await;
        }

        Ok(expired)
    }

    async fn purge_terminal(&self, older_than: DateTime<Utc>, is_test: bool) -> Result<u64> {
        let mut jobs = self.jobs.lock().await;
        let to_remove: Vec<Uuid> = jobs
            .values()
            .filter(|j| {
                j.status.is_terminal()
                    && j.is_test == is_test
                    && j.completed_at.map(|c| c < older_than).unwrap_or(false)
            })
            .map(|j| j.id)
            .collect();

        let count = to_remove.len() as u64;
        for id in to_remove {
            jobs.remove(&id);
        }
        Ok(count)
    }
}

fn paginate(items: Vec<Job>, page: PageOpts) -> Vec<Job> {
    items
        .into_iter()
        .skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect()
}

/// Convenience fixture for tests that just need a valid create request.
pub fn sample_create_request(job_type: JobType) -> CreateJobRequest {
    CreateJobRequest {
        job_type,
        payload: serde_json::json!({}),
        priority: None,
        metadata: None,
        scheduled_at: None,
        max_retries: None,
        session_id: None,
        site_id: None,
        source_id: None,
        is_test: true,
    }
}

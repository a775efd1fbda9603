//! Durable job store contract (`spec.md` §4.2).
//!
//! `JobStore` is the only thing allowed to mutate job rows. Every mutating
//! method is a conditional update scoped by current `status`, so terminal
//! transitions are idempotent by construction (`spec.md` §7).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{CreateJobRequest, Job, JobType, JobTypeStats, PageOpts};
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct ListBySourceOpts {
    pub source_id: Uuid,
    pub page: PageOpts,
}

#[derive(Debug, Clone, Copy)]
pub struct ListBySiteOpts {
    pub site_id: Uuid,
    pub page: PageOpts,
}

#[derive(Debug, Clone, Copy)]
pub struct ListOpts {
    pub job_type: Option<JobType>,
    pub page: PageOpts,
}

/// A job row joined with its site's display name, used by `List`.
#[derive(Debug, Clone)]
pub struct JobWithSiteName {
    pub job: Job,
    pub site_name: Option<String>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, req: CreateJobRequest) -> Result<Job>;

    async fn reserve_next(
        &self,
        job_type: JobType,
        lease_secs: u32,
        worker_id: &str,
    ) -> Result<Option<Job>>;

    async fn heartbeat(&self, id: Uuid, extend_secs: u32) -> Result<bool>;

    async fn complete(&self, id: Uuid) -> Result<bool>;

    async fn fail(&self, id: Uuid, err_msg: &str) -> Result<FailOutcome>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Job>>;

    async fn stats(&self, job_type: JobType) -> Result<JobTypeStats>;

    async fn list_recent_by_type(&self, job_type: JobType, limit: i64) -> Result<Vec<Job>>;

    async fn list_by_source(&self, opts: ListBySourceOpts) -> Result<Vec<Job>>;

    async fn list_by_site(&self, opts: ListBySiteOpts) -> Result<Vec<Job>>;

    async fn list(&self, opts: ListOpts) -> Result<Vec<JobWithSiteName>>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Expires overdue leases; returns the number of jobs transitioned.
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Purges terminal jobs older than `older_than`, split by `is_test`.
    async fn purge_terminal(&self, older_than: DateTime<Utc>, is_test: bool) -> Result<u64>;
}

/// Outcome of a `fail()` call, so the caller (Job Service) knows whether to
/// fire the Failure Notifier without re-deriving the retry math itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Not applied: the job wasn't running.
    NoChange,
    /// Returned to `pending` with `retry_count` incremented.
    Retried { retry_count: i32 },
    /// Moved to `failed`; terminal.
    Terminal { retry_count: i32 },
}

/// Waiter capability backing the Notifier's per-type bridge task
/// (`spec.md` §9's "Pub/sub over a DB bus" design note). Kept separate from
/// `JobStore` so a bridge task doesn't need the rest of the store surface.
#[async_trait]
pub trait Waiter: Send + Sync {
    /// Blocks until a notification for `job_type` arrives or `cancel`
    /// resolves, whichever comes first.
    async fn wait_for_notification(&self, job_type: JobType, cancel: &tokio_util::sync::CancellationToken);
}

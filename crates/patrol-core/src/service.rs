//! Business rules layered over the store (`spec.md` §4.4, C4).

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::failure_notifier::FailureNotifier;
use crate::lease::LeasePolicy;
use crate::model::{
    CreateJobRequest, Job, JobFailurePayload, JobStatus, JobTypeStats, JobType, PageOpts, Severity,
};
use crate::store::{
    FailOutcome, JobStore, JobWithSiteName, ListBySiteOpts, ListBySourceOpts, ListOpts,
};
use crate::Result;

/// Best-effort site lookup used only to enrich failure notifications. Must
/// never block the job transition it's attached to (`spec.md` §9).
#[async_trait::async_trait]
pub trait SiteNameLookup: Send + Sync {
    async fn site_name(&self, site_id: Uuid) -> Option<String>;
}

pub struct NoSiteLookup;

#[async_trait::async_trait]
impl SiteNameLookup for NoSiteLookup {
    async fn site_name(&self, _site_id: Uuid) -> Option<String> {
        None
    }
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    lease_policy: LeasePolicy,
    failure_notifier: Arc<FailureNotifier>,
    site_lookup: Arc<dyn SiteNameLookup>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        lease_policy: LeasePolicy,
        failure_notifier: Arc<FailureNotifier>,
        site_lookup: Arc<dyn SiteNameLookup>,
    ) -> Self {
        Self { store, lease_policy, failure_notifier, site_lookup }
    }

    pub async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        self.store.create(req).await
    }

    pub async fn reserve_next(
        &self,
        job_type: JobType,
        requested_lease_secs: i64,
        worker_id: &str,
    ) -> Result<Option<Job>> {
        let lease = self.lease_policy.resolve(requested_lease_secs);
        if lease.was_clamped {
            tracing::debug!(?job_type, requested_lease_secs, resolved = lease.secs, "lease clamped");
        }
        self.store.reserve_next(job_type, lease.secs, worker_id).await
    }

    pub async fn heartbeat(&self, id: Uuid, requested_extend_secs: i64) -> Result<bool> {
        let lease = self.lease_policy.resolve(requested_extend_secs);
        self.store.heartbeat(id, lease.secs).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<bool> {
        self.store.complete(id).await
    }

    /// Fails the job and, if this was the terminal transition, fires the
    /// Failure Notifier exactly once (`spec.md` §4.4/§4.8).
    pub async fn fail(&self, id: Uuid, err_msg: &str) -> Result<bool> {
        let outcome = self.store.fail(id, err_msg).await?;

        match outcome {
            FailOutcome::NoChange => Ok(false),
            FailOutcome::Retried { .. } => Ok(true),
            FailOutcome::Terminal { retry_count } => {
                self.notify_terminal_failure(id, err_msg, retry_count).await;
                Ok(true)
            }
        }
    }

    async fn notify_terminal_failure(&self, id: Uuid, err_msg: &str, retry_count: i32) {
        let Ok(Some(job)) = self.store.get_by_id(id).await else {
            tracing::warn!(job_id = %id, "terminal job vanished before enrichment");
            return;
        };

        let site_name = match job.site_id {
            Some(site_id) => {
                tokio::time::timeout(
                    std::time::Duration::from_millis(500),
                    self.site_lookup.site_name(site_id),
                )
                .await
                .ok()
                .flatten()
            }
            None => None,
        };

        let mut metadata: Map<String, Value> = job
            .metadata
            .as_ref()
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();

        metadata.insert("retry_count".into(), Value::String(retry_count.to_string()));
        metadata.insert("max_retries".into(), Value::String(job.max_retries.to_string()));
        metadata.insert("priority".into(), Value::String(job.priority.to_string()));
        metadata.insert("status".into(), Value::String(JobStatus::Failed.as_str().to_string()));
        metadata.insert("error_class".into(), Value::String(classify_error(err_msg)));

        let payload = JobFailurePayload {
            job_id: id,
            job_type: job.job_type,
            site_id: job.site_id,
            site_name,
            scope: job.job_type.as_str().to_string(),
            severity: Severity::Critical,
            error_class: classify_error(err_msg),
            metadata,
            occurred_at: Utc::now(),
        };

        self.failure_notifier.notify(payload).await;
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        self.store.get_by_id(id).await
    }

    pub async fn stats(&self, job_type: JobType) -> Result<JobTypeStats> {
        self.store.stats(job_type).await
    }

    pub async fn list_recent_by_type(&self, job_type: JobType, limit: Option<i64>) -> Result<Vec<Job>> {
        let page = PageOpts::normalize(limit, None);
        self.store.list_recent_by_type(job_type, page.limit).await
    }

    pub async fn list_by_source(
        &self,
        source_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Job>> {
        let page = PageOpts::normalize(limit, offset);
        self.store.list_by_source(ListBySourceOpts { source_id, page }).await
    }

    pub async fn list_by_site(
        &self,
        site_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Job>> {
        let page = PageOpts::normalize(limit, offset);
        self.store.list_by_site(ListBySiteOpts { site_id, page }).await
    }

    pub async fn list(
        &self,
        job_type: Option<JobType>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<JobWithSiteName>> {
        let page = PageOpts::normalize(limit, offset);
        self.store.list(ListOpts { job_type, page }).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.store.delete(id).await
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

/// Coarse error classification used for metadata/alerting, not a stable
/// taxonomy — best effort bucketing on the message text.
fn classify_error(err_msg: &str) -> String {
    let lower = err_msg.to_ascii_lowercase();
    if lower.contains("timeout") {
        "timeout".to_string()
    } else if lower.contains("lease expired") {
        "lease_expired".to_string()
    } else if lower.contains("cancel") {
        "cancelled".to_string()
    } else {
        "handler_error".to_string()
    }
}

//! Generic worker loop used by every role: browser, rules, alert dispatch,
//! secret refresh (`spec.md` §4.5, C5).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{Job, JobType};
use crate::notify::Notifier;
use crate::service::JobService;

const POLL_INITIAL: Duration = Duration::from_secs(1);
const POLL_MAX: Duration = Duration::from_secs(10);
const DRAIN_DEADLINE: Duration = Duration::from_secs(15);

/// Role-specific work. Implementations are the out-of-scope browser/rules/
/// alert-dispatch/secret-refresh handlers; the runner only knows how to call
/// them and interpret the `Result`.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, job: Job, cancel: CancellationToken) -> anyhow::Result<()>;
}

pub struct RunnerConfig {
    pub job_type: JobType,
    pub concurrency: usize,
    pub lease_secs: u32,
    pub worker_id_prefix: String,
}

pub struct Runner<H: Handler> {
    config: RunnerConfig,
    service: Arc<JobService>,
    notifier: Arc<Notifier>,
    handler: Arc<H>,
}

impl<H: Handler> Runner<H> {
    pub fn new(
        config: RunnerConfig,
        service: Arc<JobService>,
        notifier: Arc<Notifier>,
        handler: Arc<H>,
    ) -> Self {
        Self { config, service, notifier, handler }
    }

    /// Spawns `concurrency` worker tasks; returns once all have exited
    /// (normally only after `cancel` fires and the drain deadline elapses).
    pub async fn run(self, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(self.config.concurrency);

        for idx in 0..self.config.concurrency {
            let worker_id = format!("{}-{idx}", self.config.worker_id_prefix);
            let job_type = self.config.job_type;
            let lease_secs = self.config.lease_secs;
            let service = Arc::clone(&self.service);
            let notifier = Arc::clone(&self.notifier);
            let handler = Arc::clone(&self.handler);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, job_type, lease_secs, service, notifier, handler, cancel).await;
            }));
        }

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
            tracing::warn!(job_type = ?self.config.job_type, "runner drain deadline elapsed, forcing return");
        }
    }
}

async fn worker_loop<H: Handler>(
    worker_id: String,
    job_type: JobType,
    lease_secs: u32,
    service: Arc<JobService>,
    notifier: Arc<Notifier>,
    handler: Arc<H>,
    cancel: CancellationToken,
) {
    let mut subscription = notifier.subscribe(job_type);
    let mut poll_backoff = POLL_INITIAL;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let reserved = match service.reserve_next(job_type, lease_secs as i64, &worker_id).await {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(%worker_id, ?job_type, error = %err, "reservation failed");
                tokio::time::sleep(poll_backoff).await;
                continue;
            }
        };

        match reserved {
            Some(job) => {
                poll_backoff = POLL_INITIAL;
                run_one_job(job, lease_secs, &service, &handler, &cancel).await;
            }
            None => {
                tokio::select! {
                    _ = subscription.receiver.recv() => {
                        poll_backoff = POLL_INITIAL;
                    }
                    _ = tokio::time::sleep(poll_backoff) => {
                        poll_backoff = (poll_backoff * 2).min(POLL_MAX);
                    }
                    _ = cancel.cancelled() => {
                        break;
                    }
                }
            }
        }
    }

    subscription.unsubscribe(&notifier);
}

async fn run_one_job<H: Handler>(
    job: Job,
    lease_secs: u32,
    service: &Arc<JobService>,
    handler: &Arc<H>,
    runner_cancel: &CancellationToken,
) {
    let job_id = job.id;
    let handler_cancel = CancellationToken::new();
    let heartbeat_cancel = CancellationToken::new();

    let heartbeat_handle = {
        let service = Arc::clone(service);
        let handler_cancel = handler_cancel.clone();
        let heartbeat_cancel = heartbeat_cancel.clone();
        let interval = Duration::from_secs((lease_secs / 3).max(1) as u64);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match service.heartbeat(job_id, lease_secs as i64).await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!(%job_id, "heartbeat rejected, lease no longer owned");
                                handler_cancel.cancel();
                                return;
                            }
                            Err(err) => {
                                tracing::error!(%job_id, error = %err, "heartbeat call failed");
                            }
                        }
                    }
                    _ = heartbeat_cancel.cancelled() => return,
                }
            }
        })
    };

    let combined_cancel = handler_cancel.clone();
    let runner_cancel_child = runner_cancel.child_token();
    tokio::spawn({
        let combined_cancel = combined_cancel.clone();
        async move {
            runner_cancel_child.cancelled().await;
            combined_cancel.cancel();
        }
    });

    let result = handler.handle(job, combined_cancel.clone()).await;
    heartbeat_cancel.cancel();
    let _ = heartbeat_handle.await;

    match result {
        Ok(()) => {
            if let Err(err) = service.complete(job_id).await {
                tracing::error!(%job_id, error = %err, "complete call failed");
            }
        }
        Err(err) => {
            let message = if combined_cancel.is_cancelled() {
                "cancelled".to_string()
            } else {
                err.to_string()
            };
            if let Err(store_err) = service.fail(job_id, &message).await {
                tracing::error!(%job_id, error = %store_err, "fail call failed");
            }
        }
    }
}

/// Uniquely identifies a worker for lease/logging purposes.
pub fn worker_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

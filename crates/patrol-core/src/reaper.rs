//! Background sweep that fails expired leases and purges old terminal jobs
//! (`spec.md` §4.7, C7).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::store::JobStore;
use crate::Result;

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    /// How long a terminal non-test job is kept before being purged.
    pub retention: Duration,
    /// How long a terminal test job (`is_test = true`) is kept. Usually much
    /// shorter so load tests don't leave the table bloated.
    pub test_retention: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            retention: Duration::days(30),
            test_retention: Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub leases_expired: usize,
    pub purged: u64,
    pub purged_test: u64,
}

pub struct Reaper {
    store: Arc<dyn JobStore>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(store: Arc<dyn JobStore>, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) if report.leases_expired > 0 || report.purged > 0 || report.purged_test > 0 => {
                            tracing::info!(
                                leases_expired = report.leases_expired,
                                purged = report.purged,
                                purged_test = report.purged_test,
                                "reaper sweep"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => tracing::error!(error = %err, "reaper sweep failed"),
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// One sweep: reap expired leases back to `Pending`/`Failed`, then purge
    /// terminal jobs past retention. Exposed for deterministic tests.
    pub async fn sweep(&self, now: chrono::DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.store.reap_expired_leases(now).await?;
        if !expired.is_empty() {
            tracing::warn!(count = expired.len(), "reaped expired leases");
        }

        let purged = self.store.purge_terminal(now - self.config.retention, false).await?;
        let purged_test = self.store.purge_terminal(now - self.config.test_retention, true).await?;

        Ok(SweepReport {
            leases_expired: expired.len(),
            purged,
            purged_test,
        })
    }
}

//! `Waiter` backed by Postgres `LISTEN`/`NOTIFY` (`spec.md` §9's "pub/sub over
//! a DB bus" design note). `PgJobStore::create` issues the matching
//! `pg_notify` call; this is the other half of that channel.

use async_trait::async_trait;
use patrol_core::model::JobType;
use patrol_core::store::Waiter;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

pub struct PgWaiter {
    pool: PgPool,
}

impl PgWaiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Waiter for PgWaiter {
    /// Opens a fresh `LISTEN` connection per call. The bridge task this backs
    /// already loops, so a connection that drops (network blip, pooler
    /// restart) just means the next iteration reconnects — no state to carry
    /// across the gap beyond the Notifier's own backoff.
    async fn wait_for_notification(&self, job_type: JobType, cancel: &CancellationToken) {
        let channel = job_type.notify_channel();

        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(%channel, error = %err, "failed to open LISTEN connection");
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
                    _ = cancel.cancelled() => {}
                }
                return;
            }
        };

        if let Err(err) = listener.listen(&channel).await {
            tracing::warn!(%channel, error = %err, "failed to LISTEN on channel");
            return;
        }

        tokio::select! {
            notification = listener.recv() => {
                if let Err(err) = notification {
                    tracing::warn!(%channel, error = %err, "LISTEN connection lost");
                }
            }
            _ = cancel.cancelled() => {}
        }
    }
}

//! Composition root: wires store, notifier, runners, scheduler and reaper
//! together and drives coordinated shutdown (`spec.md` §4.10, C10).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::notify::Notifier;
use crate::reaper::Reaper;
use crate::scheduler::Scheduler;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A long-running background component started under the same lifecycle.
/// Runner instances, the Scheduler and the Reaper are all driven this way.
pub struct Supervisor {
    cancel: CancellationToken,
    fatal_tx: mpsc::UnboundedSender<anyhow::Error>,
    fatal_rx: Option<mpsc::UnboundedReceiver<anyhow::Error>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    notifier: Option<Arc<Notifier>>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            cancel: CancellationToken::new(),
            fatal_tx,
            fatal_rx: Some(fatal_rx),
            handles: Vec::new(),
            notifier: None,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_notifier(&mut self, notifier: Arc<Notifier>) {
        self.notifier = Some(notifier);
    }

    /// Spawns a component task. If the future returns `Err`, it is reported
    /// on the fatal channel and the whole supervisor begins shutting down —
    /// a crashed scheduler or reaper must not run the process silently
    /// degraded.
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let fatal_tx = self.fatal_tx.clone();
        self.handles.push(tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::error!(component = name, error = %err, "component exited with error");
                let _ = fatal_tx.send(err.context(format!("component '{name}' failed")));
                cancel.cancel();
            }
        }));
    }

    pub fn spawn_runner<H: crate::runner::Handler>(&mut self, runner: crate::runner::Runner<H>) {
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            runner.run(cancel).await;
        }));
    }

    pub fn spawn_scheduler(&mut self, scheduler: Arc<Scheduler>) {
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            scheduler.run(cancel).await;
        }));
    }

    pub fn spawn_reaper(&mut self, reaper: Arc<Reaper>) {
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            reaper.run(cancel).await;
        }));
    }

    /// Waits for an external shutdown signal (the caller drives `ctrl_c` or
    /// an HTTP server's own shutdown future into `external_shutdown`) or a
    /// fatal component error, then cancels every component and waits for a
    /// bounded drain.
    pub async fn run_until_shutdown<S>(mut self, external_shutdown: S)
    where
        S: std::future::Future<Output = ()>,
    {
        let mut fatal_rx = self.fatal_rx.take().expect("fatal_rx taken once");

        tokio::select! {
            _ = external_shutdown => {
                tracing::info!("shutdown signal received");
            }
            Some(err) = fatal_rx.recv() => {
                tracing::error!(error = %err, "shutting down due to fatal component error");
            }
        }

        self.cancel.cancel();
        if let Some(notifier) = self.notifier.take() {
            notifier.stop_all().await;
        }

        let drain = futures::future::join_all(std::mem::take(&mut self.handles));
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("shutdown drain timeout elapsed, exiting anyway");
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-type subscription fan-out plus the store-to-subscriber bridge
//! (`spec.md` §4.3, C3).
//!
//! Notifications are advisory: correctness never depends on them. A runner
//! that misses one still makes progress via its own periodic poll. The
//! channel per subscriber has capacity 1 with coalescing semantics — a
//! pending wakeup already means "check again", so a second notify while one
//! is outstanding is dropped rather than queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::JobType;
use crate::store::Waiter;

type SubscriberId = u64;

struct Registry {
    subscribers: DashMap<SubscriberId, mpsc::Sender<()>>,
    next_id: AtomicU64,
}

impl Registry {
    fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    fn fan_out(&self) {
        for entry in self.subscribers.iter() {
            // Capacity-1 channel: a full channel means a wakeup is already
            // pending, so dropping this one is correct coalescing, not loss.
            let _ = entry.value().try_send(());
        }
    }
}

/// Handle returned by `Notifier::subscribe`. Dropping it does *not*
/// unsubscribe — call `unsubscribe()` explicitly, mirroring the explicit
/// teardown style the rest of the core uses for lease/heartbeat ownership.
pub struct Subscription {
    job_type: JobType,
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<()>,
}

impl Subscription {
    pub fn unsubscribe(self, notifier: &Notifier) {
        notifier.unsubscribe(self.job_type, self.id);
    }
}

pub struct Notifier {
    registries: DashMap<JobType, Arc<Registry>>,
    waiter: Arc<dyn Waiter>,
    cancel: CancellationToken,
    stopped: AtomicBool,
    bridges: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

const RECONNECT_BACKOFF_INITIAL_MS: u64 = 100;
const RECONNECT_BACKOFF_MAX_MS: u64 = 5_000;

impl Notifier {
    /// Builds the notifier and spawns one bridge task per `job_type`, each
    /// looping `Waiter::wait_for_notification` and fanning out on wakeup.
    pub fn start(waiter: Arc<dyn Waiter>, job_types: &[JobType]) -> Arc<Self> {
        let notifier = Arc::new(Self {
            registries: DashMap::new(),
            waiter,
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            bridges: std::sync::Mutex::new(Vec::new()),
        });

        for &job_type in job_types {
            notifier.registries.insert(job_type, Arc::new(Registry::new()));
            notifier.spawn_bridge(job_type);
        }

        notifier
    }

    fn spawn_bridge(self: &Arc<Self>, job_type: JobType) {
        let notifier = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut backoff_ms = RECONNECT_BACKOFF_INITIAL_MS;
            loop {
                if cancel.is_cancelled() {
                    return;
                }

                notifier.waiter.wait_for_notification(job_type, &cancel).await;

                if cancel.is_cancelled() {
                    return;
                }

                if let Some(registry) = notifier.registries.get(&job_type) {
                    registry.fan_out();
                    backoff_ms = RECONNECT_BACKOFF_INITIAL_MS;
                } else {
                    // Transport hiccup surfaced as an empty wakeup; back off
                    // before retrying so a broken connection doesn't spin.
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(RECONNECT_BACKOFF_MAX_MS);
                }
            }
        });

        self.bridges.lock().unwrap().push(handle);
    }

    /// Subscribe to wakeups for `job_type`. After `stop_all()`, returns a
    /// channel with an immediate wakeup already queued so callers observe a
    /// prompt return and then see cancellation via their own context.
    pub fn subscribe(&self, job_type: JobType) -> Subscription {
        let registry = self
            .registries
            .entry(job_type)
            .or_insert_with(|| Arc::new(Registry::new()))
            .clone();

        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);

        if self.stopped.load(Ordering::Acquire) {
            let _ = tx.try_send(());
        } else {
            registry.subscribers.insert(id, tx);
        }

        Subscription { job_type, id, receiver: rx }
    }

    /// Idempotent: calling twice (or concurrently with delivery) is safe.
    pub fn unsubscribe(&self, job_type: JobType, id: SubscriberId) {
        if let Some(registry) = self.registries.get(&job_type) {
            registry.subscribers.remove(&id);
        }
    }

    pub async fn stop_all(&self) {
        self.stopped.store(true, Ordering::Release);
        self.cancel.cancel();

        let handles: Vec<_> = {
            let mut guard = self.bridges.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

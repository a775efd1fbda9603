use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use patrol_core::model::{JobStatus, JobType, OverrunPolicy, ScheduledTask};
use patrol_core::scheduler::{ScheduleStore, Scheduler};
use patrol_core::store::JobStore;
use patrol_core::Result;
use patrol_testing::InMemoryJobStore;
use uuid::Uuid;

struct FixedScheduleStore {
    tasks: Mutex<Vec<ScheduledTask>>,
    fire_key_statuses: Vec<JobStatus>,
}

impl FixedScheduleStore {
    fn new(tasks: Vec<ScheduledTask>) -> Self {
        Self { tasks: Mutex::new(tasks), fire_key_statuses: vec![] }
    }
}

#[async_trait]
impl ScheduleStore for FixedScheduleStore {
    async fn due_tasks(&self, _now: chrono::DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn mark_queued(&self, task_id: Uuid, at: chrono::DateTime<Utc>) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            task.last_queued_at = Some(at);
        }
        Ok(())
    }

    async fn set_active_fire_key(&self, task_id: Uuid, fire_key: Option<String>) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            task.active_fire_key = fire_key;
        }
        Ok(())
    }

    async fn fire_key_job_statuses(&self, _task_id: Uuid) -> Result<Vec<JobStatus>> {
        Ok(self.fire_key_statuses.clone())
    }
}

fn task() -> ScheduledTask {
    ScheduledTask {
        id: Uuid::new_v4(),
        task_name: "ioc_refresh".into(),
        interval: Duration::minutes(5),
        last_queued_at: None,
        active_fire_key: None,
        active_fire_key_set_at: None,
        job_type: JobType::Rules,
        overrun_policy: OverrunPolicy::Skip,
        overrun_states: vec![],
    }
}

#[tokio::test]
async fn fires_a_never_queued_task() {
    let schedule_store = Arc::new(FixedScheduleStore::new(vec![task()]));
    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let scheduler = Scheduler::new(schedule_store, job_store.clone());

    let report = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(report.queued, 1);

    let stats = job_store.stats(JobType::Rules).await.unwrap();
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn does_not_fire_before_interval_elapses() {
    let mut t = task();
    t.last_queued_at = Some(Utc::now());
    let schedule_store = Arc::new(FixedScheduleStore::new(vec![t]));
    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let scheduler = Scheduler::new(schedule_store, job_store);

    let report = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(report.queued, 0);
    assert_eq!(report.considered, 0);
}

#[tokio::test]
async fn overrun_with_skip_policy_marks_queued_without_firing() {
    let mut t = task();
    t.active_fire_key = Some("prior-batch".into());
    t.overrun_states = vec![JobStatus::Pending, JobStatus::Running];
    let schedule_store = Arc::new(FixedScheduleStore {
        tasks: Mutex::new(vec![t]),
        fire_key_statuses: vec![JobStatus::Running],
    });
    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let scheduler = Scheduler::new(schedule_store.clone(), job_store.clone());

    let first = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(first.queued, 0);
    assert_eq!(first.skipped_overrun, 1);

    let stats = job_store.stats(JobType::Rules).await.unwrap();
    assert_eq!(stats.pending, 0, "skipped task must not create a job");

    // mark_queued must still have advanced last_queued_at, or the
    // overrun task would be re-considered every tick forever.
    let second = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(second.considered, 0);
}

#[tokio::test]
async fn overrun_outside_configured_states_does_not_block_firing() {
    let mut t = task();
    t.active_fire_key = Some("prior-batch".into());
    t.overrun_states = vec![JobStatus::Running];
    let schedule_store = Arc::new(FixedScheduleStore {
        tasks: Mutex::new(vec![t]),
        // Completed isn't in overrun_states, so this isn't an overrun.
        fire_key_statuses: vec![JobStatus::Completed],
    });
    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let scheduler = Scheduler::new(schedule_store, job_store.clone());

    let report = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(report.queued, 1);
    assert_eq!(report.skipped_overrun, 0);
}

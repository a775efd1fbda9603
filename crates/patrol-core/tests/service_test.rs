use std::sync::Arc;

use patrol_core::failure_notifier::FailureNotifier;
use patrol_core::lease::LeasePolicy;
use patrol_core::model::{JobStatus, JobType};
use patrol_core::service::{JobService, NoSiteLookup};
use patrol_core::store::JobStore;
use patrol_testing::{sample_create_request, InMemoryJobStore};

fn service() -> JobService {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let notifier = Arc::new(FailureNotifier::new(vec![]));
    JobService::new(store, LeasePolicy::default(), notifier, Arc::new(NoSiteLookup))
}

#[tokio::test]
async fn create_then_get_round_trips_fields() {
    let svc = service();
    let mut req = sample_create_request(JobType::Browser);
    req.priority = Some(50);
    req.max_retries = Some(3);
    req.payload = serde_json::json!({"url": "https://x"});

    let created = svc.create(req).await.unwrap();
    let fetched = svc.get_by_id(created.id).await.unwrap().unwrap();

    assert_eq!(fetched.payload, serde_json::json!({"url": "https://x"}));
    assert_eq!(fetched.priority, 50);
    assert_eq!(fetched.max_retries, 3);
    assert_eq!(fetched.is_test, created.is_test);
}

#[tokio::test]
async fn terminal_failure_fires_notifier_once() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let notifier = Arc::new(FailureNotifier::new(vec![]));
    let svc = JobService::new(
        store.clone(),
        LeasePolicy::default(),
        notifier,
        Arc::new(NoSiteLookup),
    );

    let mut req = sample_create_request(JobType::Browser);
    req.max_retries = Some(1);
    let job = svc.create(req).await.unwrap();

    svc.reserve_next(JobType::Browser, 30, "w1").await.unwrap();
    let changed = svc.fail(job.id, "broken").await.unwrap();
    assert!(changed);

    let final_job = svc.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(final_job.status, JobStatus::Failed);
    assert_eq!(final_job.retry_count, 1);
}

#[tokio::test]
async fn idempotent_complete_reports_no_change_second_time() {
    let svc = service();
    let req = sample_create_request(JobType::Browser);
    let job = svc.create(req).await.unwrap();
    svc.reserve_next(JobType::Browser, 30, "w1").await.unwrap();

    assert!(svc.complete(job.id).await.unwrap());
    assert!(!svc.complete(job.id).await.unwrap());
}

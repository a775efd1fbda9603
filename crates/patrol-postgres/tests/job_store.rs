//! Integration tests against a real Postgres instance. Requires
//! `DATABASE_URL` to point at a disposable database; skipped implicitly in
//! environments without one since `create_test_pool` panics on connect.

mod common;

use patrol_core::model::{CreateJobRequest, JobStatus, JobType};
use patrol_core::store::JobStore;
use patrol_postgres::PgJobStore;

fn sample_request(job_type: JobType, priority: i32) -> CreateJobRequest {
    CreateJobRequest {
        job_type,
        payload: serde_json::json!({}),
        priority: Some(priority),
        metadata: None,
        scheduled_at: None,
        max_retries: Some(3),
        session_id: None,
        site_id: None,
        source_id: None,
        is_test: true,
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres instance reachable via DATABASE_URL"]
async fn reserve_next_respects_priority_then_fifo() {
    let pool = common::create_test_pool().await;
    let store = PgJobStore::new(pool);

    let low = store.create(sample_request(JobType::Browser, 0)).await.unwrap();
    let high = store.create(sample_request(JobType::Browser, 10)).await.unwrap();

    let reserved = store
        .reserve_next(JobType::Browser, 30, "worker-1")
        .await
        .unwrap()
        .expect("a job should be ready");

    assert_eq!(reserved.id, high.id);
    assert_ne!(reserved.id, low.id);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance reachable via DATABASE_URL"]
async fn fail_increments_retry_count_on_every_call() {
    let pool = common::create_test_pool().await;
    let store = PgJobStore::new(pool);

    let mut req = sample_request(JobType::Rules, 0);
    req.max_retries = Some(1);
    let job = store.create(req).await.unwrap();

    store.reserve_next(JobType::Rules, 30, "worker-1").await.unwrap();
    let outcome = store.fail(job.id, "boom").await.unwrap();

    match outcome {
        patrol_core::store::FailOutcome::Terminal { retry_count } => assert_eq!(retry_count, 1),
        other => panic!("expected Terminal, got {other:?}"),
    }

    let reloaded = store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert_eq!(reloaded.retry_count, 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance reachable via DATABASE_URL"]
async fn complete_is_idempotent() {
    let pool = common::create_test_pool().await;
    let store = PgJobStore::new(pool);

    let job = store.create(sample_request(JobType::Alert, 0)).await.unwrap();
    store.reserve_next(JobType::Alert, 30, "worker-1").await.unwrap();

    assert!(store.complete(job.id).await.unwrap());
    assert!(!store.complete(job.id).await.unwrap());
}

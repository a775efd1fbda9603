//! Router-level tests against the in-memory `JobStore`/`Waiter` fakes — no
//! Postgres required.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use patrol_api::events::InMemoryEventSink;
use patrol_core::failure_notifier::FailureNotifier;
use patrol_core::lease::LeasePolicy;
use patrol_core::model::JobType;
use patrol_core::notify::Notifier;
use patrol_core::service::{JobService, NoSiteLookup};
use patrol_testing::InMemoryWaiter;
use tower::ServiceExt;

fn app() -> axum::Router {
    let store: Arc<dyn patrol_core::store::JobStore> = Arc::new(patrol_testing::InMemoryJobStore::new());
    let waiter: Arc<dyn patrol_core::store::Waiter> = Arc::new(InMemoryWaiter::new());
    let notifier = Notifier::start(waiter, &[JobType::Browser]);
    let job_service = Arc::new(JobService::new(
        store,
        LeasePolicy::default(),
        Arc::new(FailureNotifier::new(vec![])),
        Arc::new(NoSiteLookup),
    ));
    let events: Arc<dyn patrol_api::events::EventSink> = Arc::new(InMemoryEventSink::default());
    let state = patrol_api::into_arc_state(job_service, notifier, events);
    patrol_api::build_router(state)
}

#[tokio::test]
async fn create_job_then_reserve_returns_it() {
    let app = app();

    let create_body = serde_json::json!({
        "job_type": "browser",
        "payload": {"url": "https://example.com"},
        "is_test": true
    });

    let create_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(create_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::OK);

    let reserve_response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/jobs/browser/reserve_next")
                .header("x-worker-id", "worker-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(reserve_response.status(), StatusCode::OK);
}

#[tokio::test]
async fn reserve_next_without_worker_id_is_a_bad_request() {
    let app = app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/jobs/browser/reserve_next")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reserve_next_with_nothing_ready_returns_no_content() {
    let app = app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/jobs/browser/reserve_next")
                .header("x-worker-id", "worker-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn events_bulk_rejects_a_missing_type() {
    let app = app();

    let body = serde_json::json!({
        "batch_id": "11111111-1111-1111-1111-111111111111",
        "session_id": "22222222-2222-2222-2222-222222222222",
        "events": [{"type": "", "data": {}}],
        "metadata": {"job_id": "33333333-3333-3333-3333-333333333333"}
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/events/bulk")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

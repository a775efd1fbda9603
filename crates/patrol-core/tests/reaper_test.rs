use std::sync::Arc;

use chrono::{Duration, Utc};
use patrol_core::model::JobType;
use patrol_core::reaper::{Reaper, ReaperConfig};
use patrol_core::store::JobStore;
use patrol_testing::{sample_create_request, InMemoryJobStore};

#[tokio::test]
async fn reaps_an_expired_lease_back_to_failed_or_pending() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let mut req = sample_create_request(JobType::Browser);
    req.max_retries = Some(5);
    let job = store.create(req).await.unwrap();

    store.reserve_next(JobType::Browser, 1, "w1").await.unwrap();
    let reaper = Reaper::new(store.clone(), ReaperConfig::default());

    let future = Utc::now() + Duration::seconds(5);
    let report = reaper.sweep(future).await.unwrap();
    assert_eq!(report.leases_expired, 1);

    let reloaded = store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.retry_count, 1);
}

#[tokio::test]
async fn sweep_with_nothing_to_do_is_quiet() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let reaper = Reaper::new(store, ReaperConfig::default());

    let report = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.leases_expired, 0);
    assert_eq!(report.purged, 0);
    assert_eq!(report.purged_test, 0);
}

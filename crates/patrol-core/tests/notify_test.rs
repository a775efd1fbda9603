use std::sync::Arc;

use patrol_core::model::JobType;
use patrol_core::notify::Notifier;
use patrol_testing::InMemoryWaiter;

#[tokio::test]
async fn subscribe_then_notify_wakes_up() {
    let waiter = Arc::new(InMemoryWaiter::new());
    let notifier = Notifier::start(waiter.clone(), &[JobType::Browser]);

    let mut sub = notifier.subscribe(JobType::Browser);
    waiter.notify(JobType::Browser);

    tokio::time::timeout(std::time::Duration::from_secs(1), sub.receiver.recv())
        .await
        .expect("should wake up")
        .expect("channel open");

    notifier.stop_all().await;
}

#[tokio::test]
async fn coalesces_back_to_back_notifications() {
    let waiter = Arc::new(InMemoryWaiter::new());
    let notifier = Notifier::start(waiter.clone(), &[JobType::Rules]);

    let mut sub = notifier.subscribe(JobType::Rules);
    waiter.notify(JobType::Rules);
    waiter.notify(JobType::Rules);

    // Give the bridge a moment to process both notifications.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Exactly one wakeup should be observable even though two
    // notifications were raised.
    sub.receiver.recv().await.unwrap();
    assert!(sub.receiver.try_recv().is_err());

    notifier.stop_all().await;
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let waiter = Arc::new(InMemoryWaiter::new());
    let notifier = Notifier::start(waiter, &[JobType::Alert]);

    let sub = notifier.subscribe(JobType::Alert);
    let id = sub.id;
    notifier.unsubscribe(JobType::Alert, id);
    notifier.unsubscribe(JobType::Alert, id);

    notifier.stop_all().await;
}

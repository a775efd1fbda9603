//! `patrol-api` composition root: loads config, wires the Postgres-backed
//! store/notifier, builds the axum router, and runs HTTP ingress alongside
//! the scheduler and reaper under one `Supervisor` (`spec.md` §4.10).

use std::sync::Arc;

use patrol_api::config::Config;
use patrol_api::events::InMemoryEventSink;
use patrol_core::failure_notifier::{FailureNotifier, FailureSink, PagerDutySink, SlackSink};
use patrol_core::lease::LeasePolicy;
use patrol_core::lifecycle::Supervisor;
use patrol_core::model::JobType;
use patrol_core::notify::Notifier;
use patrol_core::reaper::{Reaper, ReaperConfig};
use patrol_core::scheduler::Scheduler;
use patrol_core::service::{JobService, NoSiteLookup};
use patrol_postgres::{PgJobStore, PgScheduleStore, PgSiteNameLookup, PgWaiter};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

const ALL_JOB_TYPES: [JobType; 4] =
    [JobType::Browser, JobType::Rules, JobType::Alert, JobType::SecretRefresh];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(addr = %config.bind_addr, "patrol-api starting");

    let pool = PgPoolOptions::new().max_connections(20).connect(&config.database_url).await?;

    let store: Arc<dyn patrol_core::store::JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let waiter: Arc<dyn patrol_core::store::Waiter> = Arc::new(PgWaiter::new(pool.clone()));
    let notifier = Notifier::start(waiter, &ALL_JOB_TYPES);

    let mut sinks: Vec<Arc<dyn FailureSink>> = Vec::new();
    if let Some(webhook) = config.slack_webhook_url.clone() {
        sinks.push(Arc::new(SlackSink::new(reqwest::Client::new(), webhook)));
    }
    if let Some(routing_key) = config.pagerduty_routing_key.clone() {
        sinks.push(Arc::new(PagerDutySink::new(reqwest::Client::new(), routing_key)));
    }
    let failure_notifier = Arc::new(FailureNotifier::new(sinks));

    let site_lookup: Arc<dyn patrol_core::service::SiteNameLookup> = if config.database_url.is_empty()
    {
        Arc::new(NoSiteLookup)
    } else {
        Arc::new(PgSiteNameLookup::new(pool.clone()))
    };

    let lease_policy = LeasePolicy::new(config.lease_default_secs, config.lease_max_secs);
    let job_service = Arc::new(JobService::new(store.clone(), lease_policy, failure_notifier, site_lookup));

    let events: Arc<dyn patrol_api::events::EventSink> = Arc::new(InMemoryEventSink::default());

    let app_state = patrol_api::into_arc_state(job_service.clone(), notifier.clone(), events);
    let router = patrol_api::build_router(app_state);

    let mut supervisor = Supervisor::new();
    supervisor.set_notifier(notifier.clone());

    if config.enable_scheduler {
        let schedule_store = Arc::new(PgScheduleStore::new(pool.clone()));
        let scheduler = Arc::new(Scheduler::new(schedule_store, store.clone()));
        supervisor.spawn_scheduler(scheduler);
    }

    if config.enable_reaper {
        let reaper_config = ReaperConfig {
            retention: config.reaper_retention,
            test_retention: config.reaper_test_retention,
        };
        let reaper = Arc::new(Reaper::new(store.clone(), reaper_config));
        supervisor.spawn_reaper(reaper);
    }

    let listener = TcpListener::bind(config.bind_addr).await?;
    let cancel = supervisor.cancellation_token();
    info!(addr = %config.bind_addr, "patrol-api listening");

    supervisor.spawn("http", async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(anyhow::Error::from)
    });

    supervisor.run_until_shutdown(shutdown_signal()).await;

    info!("patrol-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}

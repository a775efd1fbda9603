pub mod config;
pub mod error;
pub mod events;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::http::HeaderValue;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full router: `/api/jobs*` plus `/api/events/bulk`, wrapped in
/// the same trace/response-header layering `zvault-server::main` uses.
pub fn build_router(state: AppState) -> axum::Router {
    routes::jobs::router()
        .merge(routes::events::router())
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

pub fn into_arc_state(
    job_service: Arc<patrol_core::service::JobService>,
    notifier: Arc<patrol_core::notify::Notifier>,
    events: Arc<dyn events::EventSink>,
) -> AppState {
    AppState { job_service, notifier, events }
}

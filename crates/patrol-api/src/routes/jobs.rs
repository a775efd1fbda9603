//! `/api/jobs*` handlers (`spec.md` §6).

use std::str::FromStr;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use patrol_core::model::{CreateJobRequest, JobType};
use serde::Deserialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const RESERVE_BACKOFF_INITIAL: Duration = Duration::from_millis(50);
const RESERVE_BACKOFF_MAX: Duration = Duration::from_millis(1_000);
const MAX_WAIT_SECS: i64 = 30;

pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.job_service.create(req).await?;
    Ok((StatusCode::OK, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct ReserveNextQuery {
    pub lease: Option<i64>,
    pub wait: Option<i64>,
}

/// Long-polls for a ready job: reserves immediately if one exists, otherwise
/// waits on the Notifier subscription (with a periodic poll backstop) up to
/// `wait` seconds before returning `204`.
pub async fn reserve_next(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Query(query): Query<ReserveNextQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let job_type = JobType::from_str(&job_type)?;
    let worker_id = headers
        .get("x-worker-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| patrol_core::Error::validation("missing X-Worker-Id header"))?
        .to_string();

    let lease_secs = query.lease.unwrap_or(60);
    let wait_secs = query.wait.unwrap_or(0).clamp(0, MAX_WAIT_SECS);

    if let Some(job) = state.job_service.reserve_next(job_type, lease_secs, &worker_id).await? {
        return Ok((StatusCode::OK, Json(job)).into_response());
    }

    if wait_secs == 0 {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let deadline = Instant::now() + Duration::from_secs(wait_secs as u64);
    let mut subscription = state.notifier.subscribe(job_type);
    let mut backoff = RESERVE_BACKOFF_INITIAL;

    let job = loop {
        let now = Instant::now();
        if now >= deadline {
            break None;
        }
        let remaining = deadline - now;

        tokio::select! {
            _ = subscription.receiver.recv() => {}
            _ = tokio::time::sleep(backoff.min(remaining)) => {
                backoff = (backoff * 2).min(RESERVE_BACKOFF_MAX);
            }
        }

        if let Some(job) = state.job_service.reserve_next(job_type, lease_secs, &worker_id).await? {
            break Some(job);
        }
    };

    subscription.unsubscribe(&state.notifier);

    Ok(match job {
        Some(job) => (StatusCode::OK, Json(job)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state.job_service.complete(id).await?;
    Ok(if changed { StatusCode::OK } else { StatusCode::CONFLICT })
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error: String,
}

pub async fn fail_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state.job_service.fail(id, &req.error).await?;
    Ok(if changed { StatusCode::OK } else { StatusCode::CONFLICT })
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub lease_seconds: Option<i64>,
}

pub async fn heartbeat_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let extended = state.job_service.heartbeat(id, req.lease_seconds.unwrap_or(60)).await?;
    Ok(if extended { StatusCode::OK } else { StatusCode::CONFLICT })
}

pub fn router() -> axum::Router<AppState> {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/:job_type/reserve_next", get(reserve_next))
        .route("/api/jobs/:id/complete", post(complete_job))
        .route("/api/jobs/:id/fail", post(fail_job))
        .route("/api/jobs/:id/heartbeat", post(heartbeat_job))
}

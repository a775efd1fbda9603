//! `POST /api/events/bulk` (`spec.md` §6).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::events::{normalize, BatchMetadata, NormalizedBatch, RawEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BulkEventsRequest {
    pub batch_id: Uuid,
    pub session_id: Uuid,
    pub events: Vec<RawEvent>,
    pub metadata: BatchMetadata,
}

pub async fn ingest_bulk(
    State(state): State<AppState>,
    Json(req): Json<BulkEventsRequest>,
) -> impl IntoResponse {
    let count = req.events.len();
    let normalized = match normalize(req.events) {
        Ok(events) => events,
        Err(idx) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("event at index {idx} is missing a type") })),
            )
                .into_response();
        }
    };

    let batch = NormalizedBatch {
        batch_id: req.batch_id,
        session_id: req.session_id,
        job_id: req.metadata.job_id,
        metadata: req.metadata.extra,
        events: normalized,
    };

    if let Err(err) = state.events.store_bulk(batch).await {
        tracing::error!(error = %err, "failed to store event batch");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "internal error" })))
            .into_response();
    }

    (StatusCode::ACCEPTED, Json(json!({ "accepted": count }))).into_response()
}

pub fn router() -> axum::Router<AppState> {
    use axum::routing::post;
    axum::Router::new().route("/api/events/bulk", post(ingest_bulk))
}

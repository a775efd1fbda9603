//! Central `patrol_core::Error -> axum::response::IntoResponse` mapping
//! (`spec.md` §6/§7), the idiom `zvault-server` uses for its own error enum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError(pub patrol_core::Error);

impl From<patrol_core::Error> for ApiError {
    fn from(err: patrol_core::Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            patrol_core::Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            patrol_core::Error::NotFound(id) => (StatusCode::NOT_FOUND, format!("job {id} not found")),
            patrol_core::Error::InvalidState(id) => {
                (StatusCode::CONFLICT, format!("job {id} is not in a state that allows this transition"))
            }
            patrol_core::Error::Store(err) => {
                tracing::error!(error = %err, "store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

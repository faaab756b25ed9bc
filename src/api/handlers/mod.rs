mod evals;
mod knowledge;
mod workflow;

pub use evals::*;
pub use knowledge::*;
pub use workflow::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::EngineError;

// ============================================================
// Error Handling
// ============================================================

/// Engine error rendered as a JSON response.
///
/// Domain refusals are returned to the client as-is. Infrastructure failures
/// are logged server-side and reported with a generic message so internal
/// details do not leak.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::State(_) | EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::GateFailure { .. } => StatusCode::PRECONDITION_FAILED,
        EngineError::Storage(_) | EngineError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = match &self.0 {
            err if err.is_infrastructure() => {
                tracing::error!("Internal error: {}", err);
                json!({ "error": "Internal server error", "kind": err.kind() })
            }
            EngineError::GateFailure {
                gate,
                missing,
                blocker_id,
            } => {
                tracing::warn!(gate = %gate, blocker_id = %blocker_id, "gate refused request");
                json!({
                    "error": self.0.to_string(),
                    "kind": self.0.kind(),
                    "gate": gate,
                    "missing": missing,
                    "blocker_id": blocker_id,
                })
            }
            err => {
                tracing::warn!("Request refused: {}", err);
                json!({ "error": err.to_string(), "kind": err.kind() })
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

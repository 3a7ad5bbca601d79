use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use viabus_core::CoreError;

/// HTTP adapter over the core error taxonomy. The single exhaustive match
/// here is the only place statuses are decided.
#[derive(Debug)]
pub struct AppError(pub CoreError);

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            CoreError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            CoreError::InvalidState(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            CoreError::SignatureInvalid => {
                (StatusCode::BAD_REQUEST, "invalid webhook signature".into())
            }
            CoreError::ExpiredBeyondGrace => (
                StatusCode::GONE,
                "booking expired beyond the retry grace period".into(),
            ),
            CoreError::Upstream(msg) => {
                tracing::error!("payment provider failure: {}", msg);
                (StatusCode::BAD_GATEWAY, "payment provider failure".into())
            }
            CoreError::Timeout(msg) => {
                tracing::error!("store operation timed out: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "operation timed out".into())
            }
            CoreError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

use axum::{extract::State, routing::post, Json, Router};
use serde_json::json;

use viabus_core::payment::WebhookPayload;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payment", post(payment_webhook))
}

/// Provider delivery endpoint. 200 tells the provider to stop retrying;
/// a 4xx (bad signature, unknown transaction) lets it retry or alert.
async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.webhooks.handle(&payload).await?;
    Ok(Json(json!({ "success": true })))
}

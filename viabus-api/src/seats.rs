use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use viabus_core::models::{NewSeat, SeatStatus};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/trips/{trip_id}/seat-locks",
            post(lock_seats).get(list_locked_seats),
        )
        .route("/v1/seat-locks/{session_id}", axum::routing::delete(unlock_seats))
        .route("/v1/trips/{trip_id}/seats", get(seat_availability))
        .route("/v1/trips/{trip_id}/seats:init", post(init_seats))
}

#[derive(Debug, Deserialize)]
struct LockSeatsRequest {
    seat_ids: Vec<Uuid>,
    session_id: String,
}

#[derive(Debug, Serialize)]
struct LockSeatsResponse {
    session_id: String,
    expires_at: DateTime<Utc>,
}

async fn lock_seats(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    Json(req): Json<LockSeatsRequest>,
) -> Result<Json<LockSeatsResponse>, AppError> {
    let expires_at = state
        .locks
        .lock_seats(trip_id, &req.seat_ids, &req.session_id)
        .await?;
    Ok(Json(LockSeatsResponse {
        session_id: req.session_id,
        expires_at,
    }))
}

async fn unlock_seats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.locks.unlock_seats(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct LockedSeatsResponse {
    locked_seat_ids: Vec<Uuid>,
}

async fn list_locked_seats(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<LockedSeatsResponse>, AppError> {
    let mut locked_seat_ids: Vec<Uuid> =
        state.locks.locked_seats(trip_id).await?.into_iter().collect();
    locked_seat_ids.sort();
    Ok(Json(LockedSeatsResponse { locked_seat_ids }))
}

#[derive(Debug, Serialize)]
struct SeatView {
    seat_id: Uuid,
    seat_number: String,
    status: SeatStatus,
    reserved_until: Option<DateTime<Utc>>,
    /// Interactive lock held by some selection session right now.
    locked: bool,
}

#[derive(Debug, Serialize)]
struct SeatAvailabilityResponse {
    trip_id: Uuid,
    seats: Vec<SeatView>,
}

/// Merges the durable ledger with the ephemeral lock snapshot so clients
/// see both a sold seat and one someone is currently picking.
async fn seat_availability(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<SeatAvailabilityResponse>, AppError> {
    let records = state.seats.seat_availability(trip_id).await?;
    let locked = state.locks.locked_seats(trip_id).await?;

    let seats = records
        .into_iter()
        .map(|record| SeatView {
            locked: record.status == SeatStatus::Available && locked.contains(&record.seat_id),
            seat_id: record.seat_id,
            seat_number: record.seat_number,
            status: record.status,
            reserved_until: record.reserved_until,
        })
        .collect();
    Ok(Json(SeatAvailabilityResponse { trip_id, seats }))
}

#[derive(Debug, Deserialize)]
struct InitSeatsRequest {
    seats: Vec<NewSeat>,
}

async fn init_seats(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    Json(req): Json<InitSeatsRequest>,
) -> Result<StatusCode, AppError> {
    state.seats.init_seats_for_trip(trip_id, &req.seats).await?;
    Ok(StatusCode::CREATED)
}

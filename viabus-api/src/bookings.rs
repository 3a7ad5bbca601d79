use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use viabus_booking::CreateBookingRequest;
use viabus_core::models::{Booking, Passenger, Transaction};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/lookup", get(lookup_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/retry-payment", post(retry_payment))
        .route("/v1/bookings/{id}/refund", post(request_refund))
}

#[derive(Debug, Deserialize)]
struct CreateBookingBody {
    trip_id: Uuid,
    user_id: Option<Uuid>,
    contact_email: Option<String>,
    /// Seat-selection session whose locks cover the requested seats.
    session_id: Option<String>,
    passengers: Vec<Passenger>,
}

#[derive(Debug, Serialize)]
struct BookingResponse {
    #[serde(flatten)]
    booking: Booking,
    checkout_url: Option<String>,
}

async fn with_checkout(state: &AppState, booking: Booking) -> Result<BookingResponse, AppError> {
    let checkout_url = state
        .bookings
        .latest_transaction(booking.id)
        .await?
        .map(|t| t.checkout_url);
    Ok(BookingResponse {
        booking,
        checkout_url,
    })
}

/// Turns a selection session into a durable booking: the interactive
/// locks are checked, the seats move to Reserved in the ledger, and the
/// session's locks are released once the reservation holds them instead.
async fn create_booking(
    State(state): State<AppState>,
    Json(body): Json<CreateBookingBody>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let seat_ids: Vec<Uuid> = body.passengers.iter().map(|p| p.seat_id).collect();
    if let Some(session_id) = &body.session_id {
        state
            .locks
            .validate_seat_availability(body.trip_id, &seat_ids, session_id)
            .await?;
    }

    let booking = state
        .bookings
        .create_booking(CreateBookingRequest {
            trip_id: body.trip_id,
            user_id: body.user_id,
            contact_email: body.contact_email,
            passengers: body.passengers,
        })
        .await?;

    if let Some(session_id) = &body.session_id {
        // The reservation now protects the seats; a failed unlock only
        // delays reuse until the lock TTL lapses.
        if let Err(e) = state.locks.unlock_seats(session_id).await {
            warn!(session_id, error = %e, "failed to release selection locks after booking");
        }
    }

    let response = with_checkout(&state, booking).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.bookings.booking(id).await?;
    Ok(Json(with_checkout(&state, booking).await?))
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    reference: String,
    email: Option<String>,
}

async fn lookup_booking(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .booking_by_reference(&params.reference, params.email.as_deref())
        .await?;
    Ok(Json(with_checkout(&state, booking).await?))
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    #[serde(default = "default_cancel_reason")]
    reason: String,
}

fn default_cancel_reason() -> String {
    "cancelled by customer".into()
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<Json<BookingResponse>, AppError> {
    state.bookings.cancel_booking(id, &body.reason).await?;
    let booking = state.bookings.booking(id).await?;
    Ok(Json(with_checkout(&state, booking).await?))
}

#[derive(Debug, Serialize)]
struct TransactionResponse {
    transaction_id: Uuid,
    booking_id: Uuid,
    amount: i64,
    currency: String,
    checkout_url: String,
    order_code: i64,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            transaction_id: t.id,
            booking_id: t.booking_id,
            amount: t.amount,
            currency: t.currency,
            checkout_url: t.checkout_url,
            order_code: t.order_code,
        }
    }
}

async fn retry_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction = state.bookings.retry_payment(id).await?;
    Ok(Json(transaction.into()))
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    amount: i64,
    reason: String,
}

#[derive(Debug, Serialize)]
struct RefundResponse {
    refund_id: Uuid,
    booking_id: Uuid,
    refund_amount: i64,
    status: viabus_core::models::RefundStatus,
}

async fn request_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundBody>,
) -> Result<(StatusCode, Json<RefundResponse>), AppError> {
    let refund = state
        .bookings
        .request_refund(id, body.amount, &body.reason)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RefundResponse {
            refund_id: refund.id,
            booking_id: refund.booking_id,
            refund_amount: refund.refund_amount,
            status: refund.status,
        }),
    ))
}

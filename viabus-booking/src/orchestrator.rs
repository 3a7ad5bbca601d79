use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::models::{
    Booking, BookingStatus, Passenger, Refund, RefundStatus, Transaction, TransactionStatus,
};
use viabus_core::notify::{BookingNotification, Notifier};
use viabus_core::payment::{self, CreatePaymentLinkRequest, PaymentGateway};
use viabus_core::repository::{BookingRepository, RefundRepository, TransactionRepository};
use viabus_core::trip::TripDirectory;
use viabus_seats::SeatAvailabilityService;

use crate::reference;

/// Lifecycle tunables. All of these come from configuration; none are
/// compile-time policy.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// How long an unpaid booking stays payable.
    pub booking_ttl: Duration,
    /// Window after `expires_at` during which a retry is still allowed.
    pub retry_grace: Duration,
    /// Seat reservation horizon attached to a booking.
    pub reservation_ttl: Duration,
    /// Bounded regeneration on booking-reference collision.
    pub max_reference_attempts: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            booking_ttl: Duration::from_secs(900),
            retry_grace: Duration::from_secs(3600),
            reservation_ttl: Duration::from_secs(900),
            max_reference_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub trip_id: Uuid,
    pub user_id: Option<Uuid>,
    pub contact_email: Option<String>,
    pub passengers: Vec<Passenger>,
}

/// The booking state machine. Sole owner of Booking rows; the webhook
/// path and the HTTP surface both go through these methods, never the
/// repository directly.
pub struct BookingOrchestrator {
    bookings: Arc<dyn BookingRepository>,
    transactions: Arc<dyn TransactionRepository>,
    refunds: Arc<dyn RefundRepository>,
    seats: Arc<SeatAvailabilityService>,
    trips: Arc<dyn TripDirectory>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    policy: BookingPolicy,
}

impl BookingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        transactions: Arc<dyn TransactionRepository>,
        refunds: Arc<dyn RefundRepository>,
        seats: Arc<SeatAvailabilityService>,
        trips: Arc<dyn TripDirectory>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            bookings,
            transactions,
            refunds,
            seats,
            trips,
            gateway,
            notifier,
            policy,
        }
    }

    /// Create a booking and open its first payment attempt.
    ///
    /// A payment-provider failure does not discard the booking: it is
    /// persisted as Failed and returned, so the caller keeps the
    /// reference and can retry.
    pub async fn create_booking(&self, request: CreateBookingRequest) -> CoreResult<Booking> {
        if request.passengers.is_empty() {
            return Err(CoreError::InvalidState("no passengers in booking".into()));
        }
        let seat_ids: Vec<Uuid> = request.passengers.iter().map(|p| p.seat_id).collect();

        // 1. Nothing in the set may already be sold.
        let booked = self.seats.booked_seat_ids(request.trip_id).await?;
        if seat_ids.iter().any(|seat| booked.contains(seat)) {
            return Err(CoreError::Conflict("seat already booked".into()));
        }

        // 2. Reserve the set; a mid-set conflict rolls back what was
        //    acquired so far.
        let mut reserved: Vec<Uuid> = Vec::with_capacity(seat_ids.len());
        for seat_id in &seat_ids {
            match self
                .seats
                .reserve_seat(
                    request.trip_id,
                    *seat_id,
                    request.user_id,
                    Some(self.policy.reservation_ttl),
                )
                .await
            {
                Ok(_) => reserved.push(*seat_id),
                Err(e) => {
                    self.seats
                        .release_reservations(request.trip_id, &reserved)
                        .await;
                    return Err(e);
                }
            }
        }

        // 3+4. Price and persist. A failure past this point must hand the
        //      reservations back instead of leaving them to age out.
        let trip_id = request.trip_id;
        let booking = match self.price_and_persist(request, &seat_ids).await {
            Ok(booking) => booking,
            Err(e) => {
                self.seats.release_reservations(trip_id, &seat_ids).await;
                return Err(e);
            }
        };
        info!(booking_id = %booking.id, reference = %booking.reference, total_amount = booking.total_amount, "booking created");

        // 5. Open the payment attempt. On failure the booking is parked
        //    in Failed and handed back, not dropped.
        match self.open_transaction(&booking).await {
            Ok(_) => {}
            Err(e) => {
                warn!(booking_id = %booking.id, error = %e, "payment link creation failed, parking booking as failed");
                self.bookings
                    .transition(
                        booking.id,
                        &[BookingStatus::Pending],
                        BookingStatus::Failed,
                        Utc::now(),
                        None,
                    )
                    .await?;
                self.seats
                    .release_reservations(booking.trip_id, &seat_ids)
                    .await;
            }
        }

        self.bookings
            .get(booking.id)
            .await?
            .ok_or_else(|| CoreError::Internal("booking vanished after insert".into()))
    }

    /// Open a fresh payment attempt for a Pending/Failed/Expired booking.
    /// An Expired booking is retryable only within the grace window past
    /// its `expires_at`.
    pub async fn retry_payment(&self, booking_id: Uuid) -> CoreResult<Transaction> {
        let booking = self.require_booking(booking_id).await?;
        if !booking.status.is_retryable() {
            return Err(CoreError::InvalidState(format!(
                "cannot retry payment for a {} booking",
                booking.status
            )));
        }
        if booking.status == BookingStatus::Expired {
            let grace = ChronoDuration::from_std(self.policy.retry_grace)
                .map_err(|e| CoreError::internal("grace period out of range", e))?;
            if Utc::now() > booking.expires_at + grace {
                return Err(CoreError::ExpiredBeyondGrace);
            }
        }

        // Failed/Expired bookings had their reservations released; take
        // them again before asking for money.
        let seat_ids = booking.seat_ids();
        if booking.status != BookingStatus::Pending {
            let mut reserved: Vec<Uuid> = Vec::with_capacity(seat_ids.len());
            for seat_id in &seat_ids {
                match self
                    .seats
                    .reserve_seat(
                        booking.trip_id,
                        *seat_id,
                        booking.user_id,
                        Some(self.policy.reservation_ttl),
                    )
                    .await
                {
                    Ok(_) => reserved.push(*seat_id),
                    Err(e) => {
                        self.seats
                            .release_reservations(booking.trip_id, &reserved)
                            .await;
                        return Err(e);
                    }
                }
            }
        }

        match self.open_transaction(&booking).await {
            Ok(transaction) => {
                info!(booking_id = %booking.id, transaction_id = %transaction.id, "payment retry opened");
                Ok(transaction)
            }
            Err(e) => {
                if booking.status != BookingStatus::Pending {
                    self.seats
                        .release_reservations(booking.trip_id, &seat_ids)
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Cancel a Pending booking. Remote link cancellation is best-effort:
    /// the local cancellation is authoritative for the user-facing flow.
    pub async fn cancel_booking(&self, booking_id: Uuid, reason: &str) -> CoreResult<()> {
        let booking = self.require_booking(booking_id).await?;
        match booking.status {
            BookingStatus::Cancelled => {
                return Err(CoreError::InvalidState("already cancelled".into()))
            }
            BookingStatus::Confirmed => {
                return Err(CoreError::InvalidState(
                    "cannot cancel a confirmed booking; use the refund flow".into(),
                ))
            }
            BookingStatus::Expired | BookingStatus::Failed => {
                return Err(CoreError::InvalidState(format!(
                    "cannot cancel a {} booking",
                    booking.status
                )))
            }
            BookingStatus::Pending => {}
        }

        let changed = self
            .bookings
            .transition(
                booking_id,
                &[BookingStatus::Pending],
                BookingStatus::Cancelled,
                Utc::now(),
                Some(reason),
            )
            .await?;
        if !changed {
            // Raced with a webhook; re-read for the accurate message.
            let current = self.require_booking(booking_id).await?;
            return Err(CoreError::InvalidState(format!(
                "booking is now {}, cannot cancel",
                current.status
            )));
        }

        if let Some(transaction) = self.transactions.latest_for_booking(booking_id).await? {
            if matches!(
                transaction.status,
                TransactionStatus::Pending | TransactionStatus::Processing
            ) {
                match self
                    .gateway
                    .cancel_payment_link(&transaction.payment_link_id, reason)
                    .await
                {
                    Ok(_) => {
                        self.transactions
                            .update_status(
                                transaction.id,
                                TransactionStatus::Cancelled,
                                None,
                                None,
                            )
                            .await?;
                    }
                    Err(e) => {
                        warn!(booking_id = %booking_id, error = %e, "remote payment link cancel failed; local cancellation stands");
                    }
                }
            }
        }

        self.seats
            .release_reservations(booking.trip_id, &booking.seat_ids())
            .await;
        self.send_notification(BookingNotification::Cancelled {
            booking_id,
            reference: booking.reference.clone(),
            reason: reason.to_string(),
            contact_email: booking.contact_email.clone(),
        })
        .await;
        info!(%booking_id, reason, "booking cancelled");
        Ok(())
    }

    /// Apply a transaction outcome to the booking. Idempotent: applying
    /// the same transition twice is a no-op. The optimistic guard in the
    /// repository keeps a late webhook from resurrecting a cancelled
    /// booking and a cancel from clobbering a confirmation.
    pub async fn update_booking_status(
        &self,
        booking_id: Uuid,
        transaction_status: TransactionStatus,
    ) -> CoreResult<()> {
        let Some(target) = transaction_status.booking_transition() else {
            return Ok(());
        };
        let booking = self.require_booking(booking_id).await?;
        if booking.status == target {
            return Ok(());
        }

        let allowed_from: &[BookingStatus] = match target {
            BookingStatus::Confirmed => &[
                BookingStatus::Pending,
                BookingStatus::Failed,
                BookingStatus::Expired,
            ],
            BookingStatus::Cancelled | BookingStatus::Expired | BookingStatus::Failed => {
                &[BookingStatus::Pending]
            }
            BookingStatus::Pending => return Ok(()),
        };

        let changed = self
            .bookings
            .transition(booking_id, allowed_from, target, Utc::now(), None)
            .await?;
        if !changed {
            let current = self.require_booking(booking_id).await?;
            if current.status != target {
                warn!(%booking_id, current = %current.status, requested = %target, "booking transition rejected by status guard");
            }
            return Ok(());
        }

        let seat_ids = booking.seat_ids();
        match target {
            BookingStatus::Confirmed => {
                if let Err(e) = self.seats.finalize_booked(booking.trip_id, &seat_ids).await {
                    error!(%booking_id, error = %e, "failed to finalize seats for confirmed booking");
                    return Err(e);
                }
                self.send_notification(BookingNotification::Confirmed {
                    booking_id,
                    reference: booking.reference.clone(),
                    contact_email: booking.contact_email.clone(),
                })
                .await;
                info!(%booking_id, "booking confirmed");
            }
            BookingStatus::Cancelled => {
                self.seats
                    .release_reservations(booking.trip_id, &seat_ids)
                    .await;
                self.send_notification(BookingNotification::Cancelled {
                    booking_id,
                    reference: booking.reference.clone(),
                    reason: "payment cancelled".to_string(),
                    contact_email: booking.contact_email.clone(),
                })
                .await;
            }
            BookingStatus::Expired | BookingStatus::Failed => {
                self.seats
                    .release_reservations(booking.trip_id, &seat_ids)
                    .await;
                info!(%booking_id, status = %target, "booking payment did not complete, seats released");
            }
            BookingStatus::Pending => {}
        }
        Ok(())
    }

    pub async fn booking(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.require_booking(booking_id).await
    }

    /// Reference lookup. Guest bookings (no user id) additionally require
    /// the contact email; a mismatch is Forbidden, not NotFound, so
    /// existence of the reference is not leaked.
    pub async fn booking_by_reference(
        &self,
        reference: &str,
        email: Option<&str>,
    ) -> CoreResult<Booking> {
        let booking = self
            .bookings
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {reference}")))?;
        if booking.user_id.is_none() {
            let matches = match (email, &booking.contact_email) {
                (Some(given), Some(stored)) => given.eq_ignore_ascii_case(stored),
                _ => false,
            };
            if !matches {
                return Err(CoreError::Forbidden(
                    "booking does not belong to caller".into(),
                ));
            }
        }
        Ok(booking)
    }

    pub async fn latest_transaction(&self, booking_id: Uuid) -> CoreResult<Option<Transaction>> {
        self.transactions.latest_for_booking(booking_id).await
    }

    /// Request a refund against the paid transaction of a booking. At
    /// most one refund per booking.
    pub async fn request_refund(
        &self,
        booking_id: Uuid,
        refund_amount: i64,
        reason: &str,
    ) -> CoreResult<Refund> {
        let _booking = self.require_booking(booking_id).await?;
        let transaction = self
            .transactions
            .latest_for_booking(booking_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidState("booking has no payment transaction".into())
            })?;
        if transaction.status != TransactionStatus::Paid {
            return Err(CoreError::InvalidState(
                "refund requires a paid transaction".into(),
            ));
        }
        if refund_amount <= 0 || refund_amount > transaction.amount {
            return Err(CoreError::InvalidState(format!(
                "refund amount must be between 1 and {}",
                transaction.amount
            )));
        }
        let refund = Refund {
            id: Uuid::new_v4(),
            booking_id,
            transaction_id: transaction.id,
            refund_amount,
            status: RefundStatus::Pending,
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        self.refunds.insert(&refund).await?;
        info!(%booking_id, refund_id = %refund.id, refund_amount, "refund requested");
        Ok(refund)
    }

    async fn require_booking(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {booking_id}")))
    }

    /// Price the seat set against the trip service and insert the Pending
    /// booking row. No seat-state side effects; the caller owns rollback
    /// of the reservations when this fails.
    async fn price_and_persist(
        &self,
        request: CreateBookingRequest,
        seat_ids: &[Uuid],
    ) -> CoreResult<Booking> {
        let trip = self.trips.get_trip(request.trip_id).await?;
        let seat_infos = self.trips.list_seats(request.trip_id, seat_ids).await?;
        let total_amount: i64 = seat_infos
            .iter()
            .map(|seat| (trip.base_price as f64 * seat.price_multiplier).round() as i64)
            .sum();

        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(self.policy.booking_ttl)
                .map_err(|e| CoreError::internal("booking ttl out of range", e))?;
        let booking = Booking {
            id: Uuid::new_v4(),
            reference: self.unique_reference().await?,
            trip_id: request.trip_id,
            user_id: request.user_id,
            contact_email: request.contact_email,
            passengers: request.passengers,
            total_amount,
            status: BookingStatus::Pending,
            transaction_id: None,
            expires_at,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.bookings.insert(&booking).await?;
        Ok(booking)
    }

    async fn unique_reference(&self) -> CoreResult<String> {
        for _ in 0..self.policy.max_reference_attempts {
            let candidate = reference::generate(Utc::now());
            if !self.bookings.reference_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(CoreError::Internal(
            "could not generate a unique booking reference".into(),
        ))
    }

    /// Create a payment link and persist the transaction for it. Caller
    /// decides what a failure means for the booking.
    async fn open_transaction(&self, booking: &Booking) -> CoreResult<Transaction> {
        payment::validate_amount(booking.total_amount)?;
        let now = Utc::now();
        // A retry past the original expiry still needs a future-dated
        // link; give it the configured TTL from now.
        let link_expires = if booking.expires_at > now {
            booking.expires_at
        } else {
            now + ChronoDuration::from_std(self.policy.booking_ttl)
                .map_err(|e| CoreError::internal("booking ttl out of range", e))?
        };
        payment::validate_link_expiry(link_expires, now)?;

        let request = CreatePaymentLinkRequest {
            order_code: reference::order_code(now),
            amount: booking.total_amount,
            description: format!("Bus booking {}", booking.reference),
            expires_at: link_expires,
        };
        let link = self.gateway.create_payment_link(&request).await?;

        let transaction = Transaction {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            amount: booking.total_amount,
            currency: "VND".to_string(),
            status: TransactionStatus::Pending,
            payment_link_id: link.payment_link_id,
            order_code: link.order_code,
            checkout_url: link.checkout_url,
            reference: None,
            transaction_time: None,
            created_at: now,
        };
        self.transactions.insert(&transaction).await?;
        self.bookings
            .set_transaction(booking.id, transaction.id)
            .await?;
        Ok(transaction)
    }

    async fn send_notification(&self, notification: BookingNotification) {
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(error = %e, "booking notification failed");
        }
    }
}

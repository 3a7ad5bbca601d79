use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{
    Booking, BookingStatus, NewSeat, Refund, RefundStatus, SeatRecord, Transaction,
    TransactionStatus,
};

/// Ephemeral seat locks keyed by (trip, seat), value = session id.
///
/// `try_lock_all` is the only write path for acquisition and must be a
/// single atomic multi-key operation: either every requested seat is
/// locked for the session or none are. A separate check-then-write
/// sequence is not acceptable here.
#[async_trait]
pub trait SeatLockStore: Send + Sync {
    /// Acquire all (trip, seat) keys for `session_id` with the given TTL,
    /// or none. Returns false when any seat is held by another session.
    /// A seat already held by the same session is re-acquired (TTL reset).
    async fn try_lock_all(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
        ttl: Duration,
    ) -> CoreResult<bool>;

    /// Release every lock owned by the session. Idempotent.
    async fn unlock_session(&self, session_id: &str) -> CoreResult<()>;

    /// Release only the given seats, and only where the session holds
    /// them. Locks the session owns on other seats are untouched.
    async fn unlock_seats(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
    ) -> CoreResult<()>;

    /// Snapshot of currently locked seats for a trip. Entries past their
    /// TTL are absent.
    async fn locked_seats(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>>;

    /// Session currently holding the seat, if any.
    async fn holder(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<Option<String>>;

    /// Hygiene pass removing dead entries. Correctness never depends on
    /// this; stores with native TTL may return 0 unconditionally.
    async fn purge_expired(&self) -> CoreResult<u64>;
}

/// Durable seat-status ledger. All mutations are conditional writes so
/// concurrent callers cannot double-release or double-book a seat.
#[async_trait]
pub trait SeatRepository: Send + Sync {
    /// One-time bulk insert for a freshly published trip. Fails with
    /// Conflict if any row already exists for the trip.
    async fn init_seats(&self, trip_id: Uuid, seats: &[NewSeat]) -> CoreResult<()>;

    async fn list_for_trip(&self, trip_id: Uuid) -> CoreResult<Vec<SeatRecord>>;

    /// CAS Available (or Reserved-with-lapsed-hold) -> Reserved. Returns
    /// false when the seat is booked or held live by someone else.
    async fn reserve(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        holder_user_id: Option<Uuid>,
        reserved_until: DateTime<Utc>,
    ) -> CoreResult<bool>;

    /// Demote to Available regardless of holder. Idempotent; a Booked
    /// seat is left untouched.
    async fn release(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<()>;

    /// CAS on `reserved_until`: demotes only if the row still carries the
    /// observed expiry. Returns false when another reader got there first.
    async fn release_if_expired(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        observed_until: DateTime<Utc>,
    ) -> CoreResult<bool>;

    /// CAS not-Booked -> Booked. Returns false if the seat was already
    /// booked (double-sale guard).
    async fn mark_booked(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<bool>;

    async fn booked_seat_ids(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>>;

    /// Sweep: release every reservation expired before `now`. Returns the
    /// number of rows demoted.
    async fn release_expired_before(&self, now: DateTime<Utc>) -> CoreResult<u64>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> CoreResult<()>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn get_by_reference(&self, reference: &str) -> CoreResult<Option<Booking>>;

    async fn reference_exists(&self, reference: &str) -> CoreResult<bool>;

    /// Optimistic status transition: writes `to` only if the current
    /// status is in `allowed_from`, returning whether a row changed. This
    /// guard is what keeps a late webhook from resurrecting a cancelled
    /// booking and a user cancel from clobbering a confirmation.
    async fn transition(
        &self,
        id: Uuid,
        allowed_from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> CoreResult<bool>;

    async fn set_transaction(&self, id: Uuid, transaction_id: Uuid) -> CoreResult<()>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, transaction: &Transaction) -> CoreResult<()>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<Transaction>>;

    /// Webhook correlation lookup.
    async fn find_by_order(
        &self,
        order_code: i64,
        payment_link_id: &str,
    ) -> CoreResult<Option<Transaction>>;

    async fn latest_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<Transaction>>;

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        reference: Option<&str>,
        transaction_time: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    /// At most one refund per booking; a second insert is Conflict.
    async fn insert(&self, refund: &Refund) -> CoreResult<()>;

    async fn get_by_booking(&self, booking_id: Uuid) -> CoreResult<Option<Refund>>;

    async fn update_status(&self, id: Uuid, status: RefundStatus) -> CoreResult<()>;
}

//! In-memory implementations of the core traits, used by tests and local
//! development. The lock store and seat ledger honor the same CAS
//! semantics the durable backends provide.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    Booking, BookingStatus, NewSeat, Refund, RefundStatus, SeatRecord, SeatStatus, Transaction,
    TransactionStatus,
};
use crate::notify::{BookingNotification, Notifier};
use crate::payment::{
    canonical_webhook_string, CreatePaymentLinkRequest, PaymentGateway, PaymentLink,
    PaymentLinkStatus, WebhookPayload,
};
use crate::repository::{
    BookingRepository, RefundRepository, SeatLockStore, SeatRepository, TransactionRepository,
};
use crate::trip::{SeatInfo, TripDirectory, TripInfo};

#[derive(Debug, Clone)]
struct LockEntry {
    session_id: String,
    expires_at: DateTime<Utc>,
}

impl LockEntry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
pub struct InMemorySeatLockStore {
    locks: Mutex<HashMap<(Uuid, Uuid), LockEntry>>,
}

impl InMemorySeatLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeatLockStore for InMemorySeatLockStore {
    async fn try_lock_all(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
        ttl: Duration,
    ) -> CoreResult<bool> {
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();
        // Single critical section: the check and the writes cannot
        // interleave with another caller.
        for seat_id in seat_ids {
            if let Some(entry) = locks.get(&(trip_id, *seat_id)) {
                if entry.live(now) && entry.session_id != session_id {
                    return Ok(false);
                }
            }
        }
        let expires_at = now
            + ChronoDuration::from_std(ttl)
                .map_err(|e| CoreError::internal("lock ttl out of range", e))?;
        for seat_id in seat_ids {
            locks.insert(
                (trip_id, *seat_id),
                LockEntry {
                    session_id: session_id.to_string(),
                    expires_at,
                },
            );
        }
        Ok(true)
    }

    async fn unlock_session(&self, session_id: &str) -> CoreResult<()> {
        let mut locks = self.locks.lock().unwrap();
        locks.retain(|_, entry| entry.session_id != session_id);
        Ok(())
    }

    async fn unlock_seats(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
    ) -> CoreResult<()> {
        let mut locks = self.locks.lock().unwrap();
        for seat_id in seat_ids {
            let held = locks
                .get(&(trip_id, *seat_id))
                .is_some_and(|entry| entry.session_id == session_id);
            if held {
                locks.remove(&(trip_id, *seat_id));
            }
        }
        Ok(())
    }

    async fn locked_seats(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>> {
        let now = Utc::now();
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .iter()
            .filter(|((trip, _), entry)| *trip == trip_id && entry.live(now))
            .map(|((_, seat), _)| *seat)
            .collect())
    }

    async fn holder(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<Option<String>> {
        let now = Utc::now();
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .get(&(trip_id, seat_id))
            .filter(|entry| entry.live(now))
            .map(|entry| entry.session_id.clone()))
    }

    async fn purge_expired(&self) -> CoreResult<u64> {
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();
        let before = locks.len();
        locks.retain(|_, entry| entry.live(now));
        Ok((before - locks.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemorySeatRepository {
    seats: Mutex<HashMap<(Uuid, Uuid), SeatRecord>>,
}

impl InMemorySeatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeatRepository for InMemorySeatRepository {
    async fn init_seats(&self, trip_id: Uuid, seats: &[NewSeat]) -> CoreResult<()> {
        let mut map = self.seats.lock().unwrap();
        if map.keys().any(|(trip, _)| *trip == trip_id) {
            return Err(CoreError::Conflict(format!(
                "seat map already initialized for trip {trip_id}"
            )));
        }
        for seat in seats {
            map.insert(
                (trip_id, seat.seat_id),
                SeatRecord {
                    trip_id,
                    seat_id: seat.seat_id,
                    seat_number: seat.seat_number.clone(),
                    status: SeatStatus::Available,
                    holder_user_id: None,
                    reserved_until: None,
                },
            );
        }
        Ok(())
    }

    async fn list_for_trip(&self, trip_id: Uuid) -> CoreResult<Vec<SeatRecord>> {
        let map = self.seats.lock().unwrap();
        let mut records: Vec<SeatRecord> = map
            .values()
            .filter(|r| r.trip_id == trip_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.seat_number.cmp(&b.seat_number));
        Ok(records)
    }

    async fn reserve(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        holder_user_id: Option<Uuid>,
        reserved_until: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let now = Utc::now();
        let mut map = self.seats.lock().unwrap();
        let record = map
            .get_mut(&(trip_id, seat_id))
            .ok_or_else(|| CoreError::NotFound(format!("seat {seat_id} on trip {trip_id}")))?;
        let claimable = match record.status {
            SeatStatus::Available => true,
            SeatStatus::Reserved => record.reservation_expired(now),
            SeatStatus::Booked => false,
        };
        if !claimable {
            return Ok(false);
        }
        record.status = SeatStatus::Reserved;
        record.holder_user_id = holder_user_id;
        record.reserved_until = Some(reserved_until);
        Ok(true)
    }

    async fn release(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<()> {
        let mut map = self.seats.lock().unwrap();
        if let Some(record) = map.get_mut(&(trip_id, seat_id)) {
            if record.status == SeatStatus::Reserved {
                record.status = SeatStatus::Available;
                record.holder_user_id = None;
                record.reserved_until = None;
            }
        }
        Ok(())
    }

    async fn release_if_expired(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        observed_until: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let mut map = self.seats.lock().unwrap();
        match map.get_mut(&(trip_id, seat_id)) {
            Some(record)
                if record.status == SeatStatus::Reserved
                    && record.reserved_until == Some(observed_until) =>
            {
                record.status = SeatStatus::Available;
                record.holder_user_id = None;
                record.reserved_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_booked(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<bool> {
        let mut map = self.seats.lock().unwrap();
        let record = map
            .get_mut(&(trip_id, seat_id))
            .ok_or_else(|| CoreError::NotFound(format!("seat {seat_id} on trip {trip_id}")))?;
        if record.status == SeatStatus::Booked {
            return Ok(false);
        }
        record.status = SeatStatus::Booked;
        record.reserved_until = None;
        Ok(true)
    }

    async fn booked_seat_ids(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>> {
        let map = self.seats.lock().unwrap();
        Ok(map
            .values()
            .filter(|r| r.trip_id == trip_id && r.status == SeatStatus::Booked)
            .map(|r| r.seat_id)
            .collect())
    }

    async fn release_expired_before(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let mut map = self.seats.lock().unwrap();
        let mut released = 0;
        for record in map.values_mut() {
            if record.reservation_expired(now) {
                record.status = SeatStatus::Available;
                record.holder_user_id = None;
                record.reserved_until = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: Mutex<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> CoreResult<()> {
        let mut map = self.bookings.lock().unwrap();
        if map.contains_key(&booking.id) {
            return Err(CoreError::Conflict(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        map.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.bookings.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_reference(&self, reference: &str) -> CoreResult<Option<Booking>> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .values()
            .find(|b| b.reference == reference)
            .cloned())
    }

    async fn reference_exists(&self, reference: &str) -> CoreResult<bool> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .values()
            .any(|b| b.reference == reference))
    }

    async fn transition(
        &self,
        id: Uuid,
        allowed_from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> CoreResult<bool> {
        let mut map = self.bookings.lock().unwrap();
        let booking = map
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("booking {id}")))?;
        if !allowed_from.contains(&booking.status) {
            return Ok(false);
        }
        booking.status = to;
        booking.updated_at = at;
        match to {
            BookingStatus::Confirmed => booking.confirmed_at = Some(at),
            BookingStatus::Cancelled => {
                booking.cancelled_at = Some(at);
                booking.cancellation_reason = reason.map(str::to_string);
            }
            _ => {}
        }
        Ok(true)
    }

    async fn set_transaction(&self, id: Uuid, transaction_id: Uuid) -> CoreResult<()> {
        let mut map = self.bookings.lock().unwrap();
        let booking = map
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("booking {id}")))?;
        booking.transaction_id = Some(transaction_id);
        booking.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    transactions: Mutex<Vec<Transaction>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, transaction: &Transaction) -> CoreResult<()> {
        let mut list = self.transactions.lock().unwrap();
        if list.iter().any(|t| t.id == transaction.id) {
            return Err(CoreError::Conflict(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        list.push(transaction.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn find_by_order(
        &self,
        order_code: i64,
        payment_link_id: &str,
    ) -> CoreResult<Option<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.order_code == order_code && t.payment_link_id == payment_link_id)
            .cloned())
    }

    async fn latest_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.booking_id == booking_id)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        reference: Option<&str>,
        transaction_time: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        let mut list = self.transactions.lock().unwrap();
        let transaction = list
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("transaction {id}")))?;
        transaction.status = status;
        if let Some(reference) = reference {
            transaction.reference = Some(reference.to_string());
        }
        if transaction_time.is_some() {
            transaction.transaction_time = transaction_time;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRefundRepository {
    refunds: Mutex<HashMap<Uuid, Refund>>,
}

impl InMemoryRefundRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundRepository for InMemoryRefundRepository {
    async fn insert(&self, refund: &Refund) -> CoreResult<()> {
        let mut map = self.refunds.lock().unwrap();
        if map.contains_key(&refund.booking_id) {
            return Err(CoreError::Conflict(format!(
                "refund already requested for booking {}",
                refund.booking_id
            )));
        }
        map.insert(refund.booking_id, refund.clone());
        Ok(())
    }

    async fn get_by_booking(&self, booking_id: Uuid) -> CoreResult<Option<Refund>> {
        Ok(self.refunds.lock().unwrap().get(&booking_id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: RefundStatus) -> CoreResult<()> {
        let mut map = self.refunds.lock().unwrap();
        let refund = map
            .values_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("refund {id}")))?;
        refund.status = status;
        Ok(())
    }
}

/// Mock provider: payment links are granted locally and webhook
/// signatures are the canonical string itself, so tests can forge valid
/// and invalid deliveries without real HMAC keys.
#[derive(Default)]
pub struct MockPaymentGateway {
    fail_create: AtomicBool,
    fail_cancel: AtomicBool,
    statuses: Mutex<HashMap<String, PaymentLinkStatus>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn set_link_status(&self, payment_link_id: &str, status: PaymentLinkStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(payment_link_id.to_string(), status);
    }

    pub fn cancelled_links(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn sign(data: &crate::payment::WebhookData) -> String {
        canonical_webhook_string(data)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_payment_link(
        &self,
        request: &CreatePaymentLinkRequest,
    ) -> CoreResult<PaymentLink> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CoreError::Upstream("simulated provider outage".into()));
        }
        crate::payment::validate_amount(request.amount)?;
        crate::payment::validate_link_expiry(request.expires_at, Utc::now())?;
        let payment_link_id = format!("mock_pl_{}", request.order_code);
        self.statuses
            .lock()
            .unwrap()
            .insert(payment_link_id.clone(), PaymentLinkStatus::Pending);
        Ok(PaymentLink {
            order_code: request.order_code,
            payment_link_id: payment_link_id.clone(),
            checkout_url: format!("https://pay.example.test/{payment_link_id}"),
            qr_code: format!("qr:{payment_link_id}"),
            status: PaymentLinkStatus::Pending,
        })
    }

    async fn get_payment_link(&self, payment_link_id: &str) -> CoreResult<PaymentLinkStatus> {
        self.statuses
            .lock()
            .unwrap()
            .get(payment_link_id)
            .copied()
            .ok_or_else(|| CoreError::NotFound(format!("payment link {payment_link_id}")))
    }

    async fn cancel_payment_link(
        &self,
        payment_link_id: &str,
        _reason: &str,
    ) -> CoreResult<PaymentLinkStatus> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(CoreError::Upstream("simulated cancel failure".into()));
        }
        self.cancelled
            .lock()
            .unwrap()
            .push(payment_link_id.to_string());
        self.statuses
            .lock()
            .unwrap()
            .insert(payment_link_id.to_string(), PaymentLinkStatus::Cancelled);
        Ok(PaymentLinkStatus::Cancelled)
    }

    fn verify_webhook_signature(&self, payload: &WebhookPayload) -> CoreResult<()> {
        if payload.signature == canonical_webhook_string(&payload.data) {
            Ok(())
        } else {
            Err(CoreError::SignatureInvalid)
        }
    }
}

/// Fixed trip/seat pricing source for tests and local runs.
#[derive(Default)]
pub struct StaticTripDirectory {
    trips: Mutex<HashMap<Uuid, (TripInfo, Vec<SeatInfo>)>>,
}

impl StaticTripDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_trip(&self, trip: TripInfo, seats: Vec<SeatInfo>) {
        self.trips.lock().unwrap().insert(trip.id, (trip, seats));
    }
}

#[async_trait]
impl TripDirectory for StaticTripDirectory {
    async fn get_trip(&self, trip_id: Uuid) -> CoreResult<TripInfo> {
        self.trips
            .lock()
            .unwrap()
            .get(&trip_id)
            .map(|(trip, _)| trip.clone())
            .ok_or_else(|| CoreError::NotFound(format!("trip {trip_id}")))
    }

    async fn list_seats(&self, trip_id: Uuid, seat_ids: &[Uuid]) -> CoreResult<Vec<SeatInfo>> {
        let trips = self.trips.lock().unwrap();
        let (_, seats) = trips
            .get(&trip_id)
            .ok_or_else(|| CoreError::NotFound(format!("trip {trip_id}")))?;
        let mut selected = Vec::with_capacity(seat_ids.len());
        for seat_id in seat_ids {
            let seat = seats
                .iter()
                .find(|s| s.id == *seat_id)
                .ok_or_else(|| CoreError::NotFound(format!("seat {seat_id} on trip {trip_id}")))?;
            selected.push(seat.clone());
        }
        Ok(selected)
    }
}

/// Records everything it is asked to send; tests assert on the log.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<BookingNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<BookingNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: BookingNotification) -> CoreResult<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Default notifier for local runs: logs and succeeds.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: BookingNotification) -> CoreResult<()> {
        tracing::info!(?notification, "booking notification");
        Ok(())
    }
}

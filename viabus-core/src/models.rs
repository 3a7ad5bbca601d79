use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable per-trip seat state. A seat is `Reserved` only while
/// `now < reserved_until`; readers that observe an expired reservation
/// demote it before reporting availability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    Reserved,
    Booked,
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeatStatus::Available => "available",
            SeatStatus::Reserved => "reserved",
            SeatStatus::Booked => "booked",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SeatStatus::Available),
            "reserved" => Ok(SeatStatus::Reserved),
            "booked" => Ok(SeatStatus::Booked),
            other => Err(format!("unknown seat status: {other}")),
        }
    }
}

/// One row per seat per trip in the seat-status ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatRecord {
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: String,
    pub status: SeatStatus,
    pub holder_user_id: Option<Uuid>,
    pub reserved_until: Option<DateTime<Utc>>,
}

impl SeatRecord {
    /// True when the row claims Reserved but the hold has lapsed.
    pub fn reservation_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Reserved
            && self.reserved_until.map(|until| now >= until).unwrap_or(true)
    }
}

/// Seat definition used when a trip's seat map is first published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSeat {
    pub seat_id: Uuid,
    pub seat_number: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
    Failed,
}

impl BookingStatus {
    /// Confirmed and Cancelled admit no further transitions. Expired and
    /// Failed stay retryable (a fresh payment attempt, not a new booking).
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Failed | BookingStatus::Expired
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
            BookingStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "expired" => Ok(BookingStatus::Expired),
            "failed" => Ok(BookingStatus::Failed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passenger {
    pub full_name: String,
    pub seat_id: Uuid,
}

/// The single source of truth for a customer's purchase. Owned by the
/// BookingOrchestrator; the webhook path mutates it only through the
/// orchestrator's transition API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub reference: String,
    pub trip_id: Uuid,
    /// None for guest bookings; guests look up by reference + email.
    pub user_id: Option<Uuid>,
    pub contact_email: Option<String>,
    pub passengers: Vec<Passenger>,
    /// Integer minor-unit currency (VND, no decimals).
    pub total_amount: i64,
    pub status: BookingStatus,
    pub transaction_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn seat_ids(&self) -> Vec<Uuid> {
        self.passengers.iter().map(|p| p.seat_id).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Paid,
    Cancelled,
    Expired,
    Underpaid,
    Failed,
}

impl TransactionStatus {
    /// Booking transition implied by this transaction outcome, if any.
    /// Processing and Underpaid leave the booking untouched until the
    /// provider reports a final state.
    pub fn booking_transition(&self) -> Option<BookingStatus> {
        match self {
            TransactionStatus::Paid => Some(BookingStatus::Confirmed),
            TransactionStatus::Cancelled => Some(BookingStatus::Cancelled),
            TransactionStatus::Expired => Some(BookingStatus::Expired),
            TransactionStatus::Failed => Some(BookingStatus::Failed),
            TransactionStatus::Pending
            | TransactionStatus::Processing
            | TransactionStatus::Underpaid => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Underpaid => "underpaid",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "paid" => Ok(TransactionStatus::Paid),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "expired" => Ok(TransactionStatus::Expired),
            "underpaid" => Ok(TransactionStatus::Underpaid),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// One attempt to pay for a booking via the external provider. A retry
/// opens a new Transaction; the old one keeps its final status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_link_id: String,
    pub order_code: i64,
    pub checkout_url: String,
    /// Provider-side settlement reference, set by webhook reconciliation.
    pub reference: Option<String>,
    pub transaction_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RefundStatus::Pending),
            "processing" => Ok(RefundStatus::Processing),
            "completed" => Ok(RefundStatus::Completed),
            "rejected" => Ok(RefundStatus::Rejected),
            other => Err(format!("unknown refund status: {other}")),
        }
    }
}

/// Refund against a paid transaction. At most one per booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub transaction_id: Uuid,
    pub refund_amount: i64,
    pub status: RefundStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

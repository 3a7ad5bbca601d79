use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::models::{
    Booking, BookingStatus, Passenger, Refund, RefundStatus, Transaction, TransactionStatus,
};
use viabus_core::repository::{BookingRepository, RefundRepository, TransactionRepository};

fn db_err(context: &str, e: sqlx::Error) -> CoreError {
    CoreError::internal(context, e)
}

/// Maps a unique-constraint violation to Conflict; everything else is
/// an internal store failure.
fn insert_err(context: &str, conflict: &str, e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return CoreError::Conflict(conflict.to_string());
        }
    }
    db_err(context, e)
}

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Passengers travel as a jsonb column; a booking's passenger list is
// immutable after insert so there is nothing to join against.
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    reference: String,
    trip_id: Uuid,
    user_id: Option<Uuid>,
    contact_email: Option<String>,
    passengers: serde_json::Value,
    total_amount: i64,
    status: String,
    transaction_id: Option<Uuid>,
    expires_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self) -> CoreResult<Booking> {
        let status: BookingStatus = self
            .status
            .parse()
            .map_err(|e: String| CoreError::Internal(e))?;
        let passengers: Vec<Passenger> = serde_json::from_value(self.passengers)
            .map_err(|e| CoreError::internal("decode booking passengers", e))?;
        Ok(Booking {
            id: self.id,
            reference: self.reference,
            trip_id: self.trip_id,
            user_id: self.user_id,
            contact_email: self.contact_email,
            passengers,
            total_amount: self.total_amount,
            status,
            transaction_id: self.transaction_id,
            expires_at: self.expires_at,
            confirmed_at: self.confirmed_at,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const BOOKING_COLUMNS: &str = r#"
    id, reference, trip_id, user_id, contact_email, passengers, total_amount,
    status, transaction_id, expires_at, confirmed_at, cancelled_at,
    cancellation_reason, created_at, updated_at
"#;

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> CoreResult<()> {
        let passengers = serde_json::to_value(&booking.passengers)
            .map_err(|e| CoreError::internal("encode booking passengers", e))?;
        sqlx::query(
            r#"
            INSERT INTO bookings (id, reference, trip_id, user_id, contact_email, passengers,
                                  total_amount, status, transaction_id, expires_at,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.reference)
        .bind(booking.trip_id)
        .bind(booking.user_id)
        .bind(&booking.contact_email)
        .bind(passengers)
        .bind(booking.total_amount)
        .bind(booking.status.to_string())
        .bind(booking.transaction_id)
        .bind(booking.expires_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err("insert booking", "booking reference already exists", e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get booking", e))?;
        row.map(BookingRow::into_booking).transpose()
    }

    async fn get_by_reference(&self, reference: &str) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get booking by reference", e))?;
        row.map(BookingRow::into_booking).transpose()
    }

    async fn reference_exists(&self, reference: &str) -> CoreResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE reference = $1")
            .bind(reference)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("check booking reference", e))?;
        Ok(count > 0)
    }

    async fn transition(
        &self,
        id: Uuid,
        allowed_from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> CoreResult<bool> {
        let allowed: Vec<String> = allowed_from.iter().map(|s| s.to_string()).collect();
        // The status guard lives in the WHERE clause; the row count is
        // the only signal callers get about a lost race.
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2,
                updated_at = $3,
                confirmed_at = CASE WHEN $2 = 'confirmed' THEN $3 ELSE confirmed_at END,
                cancelled_at = CASE WHEN $2 = 'cancelled' THEN $3 ELSE cancelled_at END,
                cancellation_reason = CASE WHEN $2 = 'cancelled' THEN $4 ELSE cancellation_reason END
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(to.to_string())
        .bind(at)
        .bind(reason)
        .bind(&allowed)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("transition booking", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_transaction(&self, id: Uuid, transaction_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE bookings SET transaction_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(transaction_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("set booking transaction", e))?;
        Ok(())
    }
}

pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    booking_id: Uuid,
    amount: i64,
    currency: String,
    status: String,
    payment_link_id: String,
    order_code: i64,
    checkout_url: String,
    reference: Option<String>,
    transaction_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> CoreResult<Transaction> {
        let status: TransactionStatus = self
            .status
            .parse()
            .map_err(|e: String| CoreError::Internal(e))?;
        Ok(Transaction {
            id: self.id,
            booking_id: self.booking_id,
            amount: self.amount,
            currency: self.currency,
            status,
            payment_link_id: self.payment_link_id,
            order_code: self.order_code,
            checkout_url: self.checkout_url,
            reference: self.reference,
            transaction_time: self.transaction_time,
            created_at: self.created_at,
        })
    }
}

const TRANSACTION_COLUMNS: &str = r#"
    id, booking_id, amount, currency, status, payment_link_id, order_code,
    checkout_url, reference, transaction_time, created_at
"#;

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, transaction: &Transaction) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, booking_id, amount, currency, status,
                                      payment_link_id, order_code, checkout_url,
                                      reference, transaction_time, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.booking_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.status.to_string())
        .bind(&transaction.payment_link_id)
        .bind(transaction.order_code)
        .bind(&transaction.checkout_url)
        .bind(&transaction.reference)
        .bind(transaction.transaction_time)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err("insert transaction", "order code already exists", e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get transaction", e))?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn find_by_order(
        &self,
        order_code: i64,
        payment_link_id: &str,
    ) -> CoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE order_code = $1 AND payment_link_id = $2"
        ))
        .bind(order_code)
        .bind(payment_link_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("find transaction by order", e))?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn latest_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE booking_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("latest transaction for booking", e))?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        reference: Option<&str>,
        transaction_time: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2,
                reference = COALESCE($3, reference),
                transaction_time = COALESCE($4, transaction_time)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(reference)
        .bind(transaction_time)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("update transaction status", e))?;
        Ok(())
    }
}

pub struct PgRefundRepository {
    pool: PgPool,
}

impl PgRefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    booking_id: Uuid,
    transaction_id: Uuid,
    refund_amount: i64,
    status: String,
    reason: String,
    created_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_refund(self) -> CoreResult<Refund> {
        let status: RefundStatus = self
            .status
            .parse()
            .map_err(|e: String| CoreError::Internal(e))?;
        Ok(Refund {
            id: self.id,
            booking_id: self.booking_id,
            transaction_id: self.transaction_id,
            refund_amount: self.refund_amount,
            status,
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl RefundRepository for PgRefundRepository {
    async fn insert(&self, refund: &Refund) -> CoreResult<()> {
        // The unique index on booking_id enforces one refund per booking.
        sqlx::query(
            r#"
            INSERT INTO refunds (id, booking_id, transaction_id, refund_amount, status, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(refund.id)
        .bind(refund.booking_id)
        .bind(refund.transaction_id)
        .bind(refund.refund_amount)
        .bind(refund.status.to_string())
        .bind(&refund.reason)
        .bind(refund.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err("insert refund", "refund already requested for booking", e))?;
        Ok(())
    }

    async fn get_by_booking(&self, booking_id: Uuid) -> CoreResult<Option<Refund>> {
        let row = sqlx::query_as::<_, RefundRow>(
            r#"
            SELECT id, booking_id, transaction_id, refund_amount, status, reason, created_at
            FROM refunds WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get refund by booking", e))?;
        row.map(RefundRow::into_refund).transpose()
    }

    async fn update_status(&self, id: Uuid, status: RefundStatus) -> CoreResult<()> {
        sqlx::query("UPDATE refunds SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("update refund status", e))?;
        Ok(())
    }
}

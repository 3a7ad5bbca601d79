use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::models::{NewSeat, SeatRecord, SeatStatus};
use viabus_core::repository::SeatRepository;

/// Seat-status ledger on Postgres. Every mutation is a conditional
/// UPDATE whose WHERE clause carries the expected prior state, and the
/// affected-row count is the CAS outcome. No transaction ever holds a
/// row lock across an await on an external call.
pub struct PgSeatRepository {
    pool: PgPool,
}

impl PgSeatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    trip_id: Uuid,
    seat_id: Uuid,
    seat_number: String,
    status: String,
    holder_user_id: Option<Uuid>,
    reserved_until: Option<DateTime<Utc>>,
}

impl SeatRow {
    fn into_record(self) -> CoreResult<SeatRecord> {
        let status: SeatStatus = self
            .status
            .parse()
            .map_err(|e: String| CoreError::Internal(e))?;
        Ok(SeatRecord {
            trip_id: self.trip_id,
            seat_id: self.seat_id,
            seat_number: self.seat_number,
            status,
            holder_user_id: self.holder_user_id,
            reserved_until: self.reserved_until,
        })
    }
}

fn db_err(context: &str, e: sqlx::Error) -> CoreError {
    CoreError::internal(context, e)
}

#[async_trait]
impl SeatRepository for PgSeatRepository {
    async fn init_seats(&self, trip_id: Uuid, seats: &[NewSeat]) -> CoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("begin seat init", e))?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM trip_seats WHERE trip_id = $1")
                .bind(trip_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_err("count trip seats", e))?;
        if existing > 0 {
            return Err(CoreError::Conflict(format!(
                "seat map already initialized for trip {trip_id}"
            )));
        }

        for seat in seats {
            sqlx::query(
                r#"
                INSERT INTO trip_seats (trip_id, seat_id, seat_number, status)
                VALUES ($1, $2, $3, 'available')
                "#,
            )
            .bind(trip_id)
            .bind(seat.seat_id)
            .bind(&seat.seat_number)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("insert trip seat", e))?;
        }

        tx.commit().await.map_err(|e| db_err("commit seat init", e))
    }

    async fn list_for_trip(&self, trip_id: Uuid) -> CoreResult<Vec<SeatRecord>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT trip_id, seat_id, seat_number, status, holder_user_id, reserved_until
            FROM trip_seats
            WHERE trip_id = $1
            ORDER BY seat_number
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list trip seats", e))?;

        rows.into_iter().map(SeatRow::into_record).collect()
    }

    async fn reserve(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        holder_user_id: Option<Uuid>,
        reserved_until: DateTime<Utc>,
    ) -> CoreResult<bool> {
        // Available, or Reserved with a lapsed hold. Booked never matches.
        let result = sqlx::query(
            r#"
            UPDATE trip_seats
            SET status = 'reserved', holder_user_id = $3, reserved_until = $4
            WHERE trip_id = $1 AND seat_id = $2
              AND (status = 'available'
                   OR (status = 'reserved' AND (reserved_until IS NULL OR reserved_until <= NOW())))
            "#,
        )
        .bind(trip_id)
        .bind(seat_id)
        .bind(holder_user_id)
        .bind(reserved_until)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("reserve seat", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE trip_seats
            SET status = 'available', holder_user_id = NULL, reserved_until = NULL
            WHERE trip_id = $1 AND seat_id = $2 AND status = 'reserved'
            "#,
        )
        .bind(trip_id)
        .bind(seat_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("release seat", e))?;
        Ok(())
    }

    async fn release_if_expired(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        observed_until: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trip_seats
            SET status = 'available', holder_user_id = NULL, reserved_until = NULL
            WHERE trip_id = $1 AND seat_id = $2
              AND status = 'reserved' AND reserved_until = $3
            "#,
        )
        .bind(trip_id)
        .bind(seat_id)
        .bind(observed_until)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("release expired seat", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_booked(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trip_seats
            SET status = 'booked', reserved_until = NULL
            WHERE trip_id = $1 AND seat_id = $2 AND status <> 'booked'
            "#,
        )
        .bind(trip_id)
        .bind(seat_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("mark seat booked", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn booked_seat_ids(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT seat_id FROM trip_seats WHERE trip_id = $1 AND status = 'booked'",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list booked seats", e))?;

        Ok(ids.into_iter().collect())
    }

    async fn release_expired_before(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE trip_seats
            SET status = 'available', holder_user_id = NULL, reserved_until = NULL
            WHERE status = 'reserved' AND reserved_until IS NOT NULL AND reserved_until <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("sweep expired reservations", e))?;

        Ok(result.rows_affected())
    }
}

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::models::{NewSeat, SeatRecord, SeatStatus};
use viabus_core::repository::SeatRepository;

/// Default booking-time reservation: 15 minutes, independent from the
/// 5-minute interactive lock.
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(900);

/// Durable seat-status ledger operations. Reservations are lazily expired
/// on read via per-seat CAS; the periodic sweep is hygiene only.
pub struct SeatAvailabilityService {
    seats: Arc<dyn SeatRepository>,
    default_reservation: Duration,
}

impl SeatAvailabilityService {
    pub fn new(seats: Arc<dyn SeatRepository>, default_reservation: Duration) -> Self {
        Self {
            seats,
            default_reservation,
        }
    }

    pub fn with_defaults(seats: Arc<dyn SeatRepository>) -> Self {
        Self::new(seats, DEFAULT_RESERVATION_TTL)
    }

    pub fn default_reservation(&self) -> Duration {
        self.default_reservation
    }

    /// One-time bulk insert when a trip is published. Duplicate
    /// "trip created" events surface as Conflict.
    pub async fn init_seats_for_trip(&self, trip_id: Uuid, seats: &[NewSeat]) -> CoreResult<()> {
        if seats.is_empty() {
            return Err(CoreError::InvalidState("empty seat map".into()));
        }
        self.seats.init_seats(trip_id, seats).await?;
        info!(%trip_id, seats = seats.len(), "seat map initialized");
        Ok(())
    }

    /// Per-seat snapshot. Expired reservations are demoted before being
    /// reported; losing the CAS just means a concurrent reader demoted
    /// the row first, so the seat is reported Available either way.
    pub async fn seat_availability(&self, trip_id: Uuid) -> CoreResult<Vec<SeatRecord>> {
        let now = Utc::now();
        let mut records = self.seats.list_for_trip(trip_id).await?;
        for record in records.iter_mut() {
            if record.reservation_expired(now) {
                if let Some(observed) = record.reserved_until {
                    let demoted = self
                        .seats
                        .release_if_expired(trip_id, record.seat_id, observed)
                        .await?;
                    if !demoted {
                        debug!(%trip_id, seat_id = %record.seat_id, "expired reservation already demoted elsewhere");
                    }
                }
                record.status = SeatStatus::Available;
                record.holder_user_id = None;
                record.reserved_until = None;
            }
        }
        Ok(records)
    }

    /// Claim a seat for an in-progress booking. `duration` falls back to
    /// the configured reservation horizon.
    pub async fn reserve_seat(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        holder_user_id: Option<Uuid>,
        duration: Option<Duration>,
    ) -> CoreResult<DateTime<Utc>> {
        let duration = duration.unwrap_or(self.default_reservation);
        let reserved_until = Utc::now()
            + ChronoDuration::from_std(duration)
                .map_err(|e| CoreError::internal("reservation ttl out of range", e))?;
        let reserved = self
            .seats
            .reserve(trip_id, seat_id, holder_user_id, reserved_until)
            .await?;
        if !reserved {
            return Err(CoreError::Conflict(format!(
                "seat {seat_id} is not available"
            )));
        }
        Ok(reserved_until)
    }

    /// Demote to Available regardless of holder. Idempotent.
    pub async fn release_seat(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<()> {
        self.seats.release(trip_id, seat_id).await
    }

    /// Bulk release for cancel/expiry/failure paths; individual failures
    /// are logged, the rest still get released.
    pub async fn release_reservations(&self, trip_id: Uuid, seat_ids: &[Uuid]) {
        for seat_id in seat_ids {
            if let Err(e) = self.seats.release(trip_id, *seat_id).await {
                warn!(%trip_id, %seat_id, error = %e, "failed to release seat reservation");
            }
        }
    }

    pub async fn booked_seat_ids(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>> {
        self.seats.booked_seat_ids(trip_id).await
    }

    /// Move seats to Booked after payment confirmation. Any seat that is
    /// already Booked aborts the whole set with Conflict; that is the
    /// no-double-sale guard, and it fires before any further writes.
    pub async fn finalize_booked(&self, trip_id: Uuid, seat_ids: &[Uuid]) -> CoreResult<()> {
        for seat_id in seat_ids {
            let booked = self.seats.mark_booked(trip_id, *seat_id).await?;
            if !booked {
                return Err(CoreError::Conflict(format!(
                    "seat {seat_id} already booked"
                )));
            }
        }
        info!(%trip_id, seats = seat_ids.len(), "seats booked");
        Ok(())
    }

    /// Hygiene sweep for the background worker.
    pub async fn sweep_expired_reservations(&self) -> CoreResult<u64> {
        let released = self.seats.release_expired_before(Utc::now()).await?;
        if released > 0 {
            info!(released, "expired seat reservations swept");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viabus_core::memory::InMemorySeatRepository;

    fn service() -> SeatAvailabilityService {
        SeatAvailabilityService::with_defaults(Arc::new(InMemorySeatRepository::new()))
    }

    fn seat_map(n: usize) -> Vec<NewSeat> {
        (0..n)
            .map(|i| NewSeat {
                seat_id: Uuid::new_v4(),
                seat_number: format!("A{}", i + 1),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_double_init_rejected() {
        let service = service();
        let trip = Uuid::new_v4();
        let seats = seat_map(4);

        service.init_seats_for_trip(trip, &seats).await.unwrap();
        let err = service
            .init_seats_for_trip(trip, &seats)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reserve_then_conflict() {
        let service = service();
        let trip = Uuid::new_v4();
        let seats = seat_map(2);
        service.init_seats_for_trip(trip, &seats).await.unwrap();

        service
            .reserve_seat(trip, seats[0].seat_id, None, None)
            .await
            .unwrap();
        let err = service
            .reserve_seat(trip, seats[0].seat_id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_read() {
        let service = service();
        let trip = Uuid::new_v4();
        let seats = seat_map(1);
        service.init_seats_for_trip(trip, &seats).await.unwrap();

        service
            .reserve_seat(
                trip,
                seats[0].seat_id,
                None,
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let snapshot = service.seat_availability(trip).await.unwrap();
        assert_eq!(snapshot[0].status, SeatStatus::Available);

        // The demotion is durable: a fresh reserve succeeds.
        service
            .reserve_seat(trip, seats[0].seat_id, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_holder_agnostic() {
        let service = service();
        let trip = Uuid::new_v4();
        let seats = seat_map(1);
        service.init_seats_for_trip(trip, &seats).await.unwrap();

        service
            .reserve_seat(trip, seats[0].seat_id, Some(Uuid::new_v4()), None)
            .await
            .unwrap();
        service.release_seat(trip, seats[0].seat_id).await.unwrap();
        service.release_seat(trip, seats[0].seat_id).await.unwrap();

        let snapshot = service.seat_availability(trip).await.unwrap();
        assert_eq!(snapshot[0].status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_no_double_sale() {
        let service = service();
        let trip = Uuid::new_v4();
        let seats = seat_map(2);
        service.init_seats_for_trip(trip, &seats).await.unwrap();

        service
            .finalize_booked(trip, &[seats[0].seat_id])
            .await
            .unwrap();
        let err = service
            .finalize_booked(trip, &[seats[0].seat_id])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let booked = service.booked_seat_ids(trip).await.unwrap();
        assert_eq!(booked.len(), 1);
    }

    #[tokio::test]
    async fn test_booked_seat_survives_release() {
        let service = service();
        let trip = Uuid::new_v4();
        let seats = seat_map(1);
        service.init_seats_for_trip(trip, &seats).await.unwrap();

        service
            .finalize_booked(trip, &[seats[0].seat_id])
            .await
            .unwrap();
        service.release_seat(trip, seats[0].seat_id).await.unwrap();

        let snapshot = service.seat_availability(trip).await.unwrap();
        assert_eq!(snapshot[0].status, SeatStatus::Booked);
    }

    #[tokio::test]
    async fn test_sweep_releases_expired() {
        let service = service();
        let trip = Uuid::new_v4();
        let seats = seat_map(3);
        service.init_seats_for_trip(trip, &seats).await.unwrap();

        for seat in &seats[..2] {
            service
                .reserve_seat(trip, seat.seat_id, None, Some(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        service
            .reserve_seat(trip, seats[2].seat_id, None, Some(Duration::from_secs(600)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let released = service.sweep_expired_reservations().await.unwrap();
        assert_eq!(released, 2);
    }
}

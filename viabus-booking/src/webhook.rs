use std::sync::Arc;
use tracing::{info, warn};

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::payment::{PaymentGateway, WebhookPayload};
use viabus_core::repository::TransactionRepository;

use crate::orchestrator::BookingOrchestrator;

/// Applies asynchronous provider outcomes to local Transaction/Booking
/// state. Safe to run on duplicate deliveries: an event whose transaction
/// already carries the target status only re-drives the idempotent
/// booking transition, so a half-applied delivery heals on retry.
pub struct WebhookProcessor {
    gateway: Arc<dyn PaymentGateway>,
    transactions: Arc<dyn TransactionRepository>,
    orchestrator: Arc<BookingOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        transactions: Arc<dyn TransactionRepository>,
        orchestrator: Arc<BookingOrchestrator>,
    ) -> Self {
        Self {
            gateway,
            transactions,
            orchestrator,
        }
    }

    pub async fn handle(&self, payload: &WebhookPayload) -> CoreResult<()> {
        // 1. Authenticity first; a bad signature aborts with no state
        //    change at all.
        self.gateway.verify_webhook_signature(payload)?;

        // 2. Defensive re-fetch: the provider's live link status wins
        //    over whatever the payload claims, which blunts replayed or
        //    spoofed bodies that carry a stale status.
        let live_status = self
            .gateway
            .get_payment_link(&payload.data.payment_link_id)
            .await?;
        let target = live_status.to_transaction_status();

        // 3. Correlate to a local transaction.
        let transaction = self
            .transactions
            .find_by_order(payload.data.order_code, &payload.data.payment_link_id)
            .await?
            .ok_or_else(|| {
                warn!(
                    order_code = payload.data.order_code,
                    payment_link_id = %payload.data.payment_link_id,
                    "webhook for unknown transaction"
                );
                CoreError::NotFound(format!(
                    "transaction for order {}",
                    payload.data.order_code
                ))
            })?;

        // 4. Duplicate delivery: the transaction is already reconciled.
        //    Still drive the booking transition, which is idempotent, in
        //    case a prior delivery recorded the transaction and then died
        //    before advancing the booking.
        if transaction.status == target {
            info!(transaction_id = %transaction.id, status = %target, "webhook already applied to transaction");
            return self
                .orchestrator
                .update_booking_status(transaction.booking_id, target)
                .await;
        }

        // 5. Record the provider outcome on the transaction.
        self.transactions
            .update_status(
                transaction.id,
                target,
                payload.data.reference.as_deref(),
                payload.data.transaction_time,
            )
            .await?;

        // 6. Advance the booking through the orchestrator, which also
        //    moves seats to booked or releases them.
        self.orchestrator
            .update_booking_status(transaction.booking_id, target)
            .await?;
        info!(
            transaction_id = %transaction.id,
            booking_id = %transaction.booking_id,
            status = %target,
            "webhook reconciled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{BookingPolicy, CreateBookingRequest};
    use chrono::Utc;
    use uuid::Uuid;
    use viabus_core::memory::{
        InMemoryBookingRepository, InMemoryRefundRepository, InMemorySeatRepository,
        InMemoryTransactionRepository, MockPaymentGateway, RecordingNotifier,
        StaticTripDirectory,
    };
    use viabus_core::models::{
        Booking, BookingStatus, NewSeat, Passenger, SeatStatus, TransactionStatus,
    };
    use viabus_core::notify::BookingNotification;
    use viabus_core::payment::{PaymentLinkStatus, WebhookData};
    use viabus_core::trip::{SeatInfo, TripInfo};
    use viabus_seats::SeatAvailabilityService;

    struct Env {
        orchestrator: Arc<BookingOrchestrator>,
        processor: WebhookProcessor,
        gateway: Arc<MockPaymentGateway>,
        transactions: Arc<InMemoryTransactionRepository>,
        seats: Arc<SeatAvailabilityService>,
        notifier: Arc<RecordingNotifier>,
        trip_id: Uuid,
        seat_ids: Vec<Uuid>,
    }

    async fn env() -> Env {
        let trip_id = Uuid::new_v4();
        let seat_ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        let seat_repo = Arc::new(InMemorySeatRepository::new());
        let seats = Arc::new(SeatAvailabilityService::with_defaults(seat_repo));
        let new_seats: Vec<NewSeat> = seat_ids
            .iter()
            .enumerate()
            .map(|(i, id)| NewSeat {
                seat_id: *id,
                seat_number: format!("B{}", i + 1),
            })
            .collect();
        seats.init_seats_for_trip(trip_id, &new_seats).await.unwrap();

        let trips = Arc::new(StaticTripDirectory::new());
        trips.insert_trip(
            TripInfo {
                id: trip_id,
                base_price: 100_000,
                departure_at: Utc::now() + chrono::Duration::days(1),
            },
            seat_ids
                .iter()
                .enumerate()
                .map(|(i, id)| SeatInfo {
                    id: *id,
                    seat_number: format!("B{}", i + 1),
                    price_multiplier: if i == 2 { 1.5 } else { 1.0 },
                })
                .collect(),
        );

        let gateway = Arc::new(MockPaymentGateway::new());
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let orchestrator = Arc::new(BookingOrchestrator::new(
            Arc::new(InMemoryBookingRepository::new()),
            transactions.clone(),
            Arc::new(InMemoryRefundRepository::new()),
            seats.clone(),
            trips,
            gateway.clone(),
            notifier.clone(),
            BookingPolicy::default(),
        ));
        let processor = WebhookProcessor::new(
            gateway.clone(),
            transactions.clone(),
            orchestrator.clone(),
        );
        Env {
            orchestrator,
            processor,
            gateway,
            transactions,
            seats,
            notifier,
            trip_id,
            seat_ids,
        }
    }

    async fn create_booking(env: &Env, seat_idx: &[usize]) -> Booking {
        env.orchestrator
            .create_booking(CreateBookingRequest {
                trip_id: env.trip_id,
                user_id: None,
                contact_email: Some("rider@example.com".into()),
                passengers: seat_idx
                    .iter()
                    .map(|i| Passenger {
                        full_name: format!("Passenger {i}"),
                        seat_id: env.seat_ids[*i],
                    })
                    .collect(),
            })
            .await
            .unwrap()
    }

    async fn latest_transaction(
        env: &Env,
        booking: &Booking,
    ) -> viabus_core::models::Transaction {
        env.transactions
            .latest_for_booking(booking.id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn paid_payload(env: &Env, booking: &Booking) -> WebhookPayload {
        let transaction = latest_transaction(env, booking).await;
        let data = WebhookData {
            order_code: transaction.order_code,
            payment_link_id: transaction.payment_link_id.clone(),
            status: PaymentLinkStatus::Paid,
            reference: Some("FT0001".into()),
            transaction_time: Some(Utc::now()),
        };
        env.gateway
            .set_link_status(&transaction.payment_link_id, PaymentLinkStatus::Paid);
        WebhookPayload {
            signature: MockPaymentGateway::sign(&data),
            data,
        }
    }

    #[tokio::test]
    async fn test_paid_webhook_confirms_booking() {
        let env = env().await;
        let booking = create_booking(&env, &[2]).await;
        assert_eq!(booking.total_amount, 150_000);

        let payload = paid_payload(&env, &booking).await;
        env.processor.handle(&payload).await.unwrap();

        let updated = env.orchestrator.booking(booking.id).await.unwrap();
        assert_eq!(updated.status, BookingStatus::Confirmed);
        assert!(updated.confirmed_at.is_some());

        let snapshot = env.seats.seat_availability(env.trip_id).await.unwrap();
        let seat = snapshot
            .iter()
            .find(|s| s.seat_id == env.seat_ids[2])
            .unwrap();
        assert_eq!(seat.status, SeatStatus::Booked);
    }

    #[tokio::test]
    async fn test_duplicate_webhook_is_noop() {
        let env = env().await;
        let booking = create_booking(&env, &[0]).await;
        let payload = paid_payload(&env, &booking).await;

        env.processor.handle(&payload).await.unwrap();
        env.processor.handle(&payload).await.unwrap();

        let updated = env.orchestrator.booking(booking.id).await.unwrap();
        assert_eq!(updated.status, BookingStatus::Confirmed);

        // No duplicate side effects: exactly one confirmation message.
        let confirmations = env
            .notifier
            .sent()
            .into_iter()
            .filter(|n| matches!(n, BookingNotification::Confirmed { .. }))
            .count();
        assert_eq!(confirmations, 1);
    }

    #[tokio::test]
    async fn test_retry_heals_booking_after_partial_apply() {
        let env = env().await;
        let booking = create_booking(&env, &[0]).await;
        let payload = paid_payload(&env, &booking).await;

        // A first delivery recorded the transaction outcome but died
        // before the booking transition.
        let transaction = latest_transaction(&env, &booking).await;
        env.transactions
            .update_status(transaction.id, TransactionStatus::Paid, None, None)
            .await
            .unwrap();
        let stuck = env.orchestrator.booking(booking.id).await.unwrap();
        assert_eq!(stuck.status, BookingStatus::Pending);

        // The provider's retry must finish the job.
        env.processor.handle(&payload).await.unwrap();

        let healed = env.orchestrator.booking(booking.id).await.unwrap();
        assert_eq!(healed.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let env = env().await;
        let booking = create_booking(&env, &[0]).await;
        let mut payload = paid_payload(&env, &booking).await;
        payload.signature = "forged".into();

        let err = env.processor.handle(&payload).await.unwrap_err();
        assert!(matches!(err, CoreError::SignatureInvalid));

        let unchanged = env.orchestrator.booking(booking.id).await.unwrap();
        assert_eq!(unchanged.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_not_found() {
        let env = env().await;
        let booking = create_booking(&env, &[0]).await;
        let mut payload = paid_payload(&env, &booking).await;
        payload.data.order_code += 1;
        payload.signature = MockPaymentGateway::sign(&payload.data);

        let err = env.processor.handle(&payload).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_live_status_wins_over_payload() {
        let env = env().await;
        let booking = create_booking(&env, &[0]).await;
        let transaction = latest_transaction(&env, &booking).await;

        // Payload claims PAID but the provider says the link expired.
        let data = WebhookData {
            order_code: transaction.order_code,
            payment_link_id: transaction.payment_link_id.clone(),
            status: PaymentLinkStatus::Paid,
            reference: None,
            transaction_time: None,
        };
        env.gateway
            .set_link_status(&transaction.payment_link_id, PaymentLinkStatus::Expired);
        let payload = WebhookPayload {
            signature: MockPaymentGateway::sign(&data),
            data,
        };
        env.processor.handle(&payload).await.unwrap();

        let updated = env.orchestrator.booking(booking.id).await.unwrap();
        assert_eq!(updated.status, BookingStatus::Expired);
        let transaction = latest_transaction(&env, &booking).await;
        assert_eq!(transaction.status, TransactionStatus::Expired);
    }

    #[tokio::test]
    async fn test_late_webhook_cannot_resurrect_cancelled_booking() {
        let env = env().await;
        let booking = create_booking(&env, &[0]).await;
        let payload = paid_payload(&env, &booking).await;

        env.orchestrator
            .cancel_booking(booking.id, "changed my mind")
            .await
            .unwrap();

        // The paid webhook arrives after the user cancelled.
        env.processor.handle(&payload).await.unwrap();

        let updated = env.orchestrator.booking(booking.id).await.unwrap();
        assert_eq!(updated.status, BookingStatus::Cancelled);

        let snapshot = env.seats.seat_availability(env.trip_id).await.unwrap();
        let seat = snapshot
            .iter()
            .find(|s| s.seat_id == env.seat_ids[0])
            .unwrap();
        assert_ne!(seat.status, SeatStatus::Booked);
    }
}

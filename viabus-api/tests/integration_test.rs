use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tower::ServiceExt;
use uuid::Uuid;

use viabus_api::{app, worker::NotificationPool, AppState};
use viabus_booking::{BookingOrchestrator, BookingPolicy, WebhookProcessor};
use viabus_core::memory::{
    InMemoryBookingRepository, InMemoryRefundRepository, InMemorySeatLockStore,
    InMemorySeatRepository, InMemoryTransactionRepository, MockPaymentGateway, RecordingNotifier,
    StaticTripDirectory,
};
use viabus_core::models::NewSeat;
use viabus_core::payment::{PaymentLinkStatus, WebhookData, WebhookPayload};
use viabus_core::trip::{SeatInfo, TripInfo};
use viabus_seats::{SeatAvailabilityService, SeatLockManager};

struct TestApp {
    router: Router,
    gateway: Arc<MockPaymentGateway>,
    trip_id: Uuid,
    seat_ids: Vec<Uuid>,
}

async fn test_app() -> TestApp {
    let trip_id = Uuid::new_v4();
    let seat_ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    let seat_repo = Arc::new(InMemorySeatRepository::new());
    let seats = Arc::new(SeatAvailabilityService::with_defaults(seat_repo));
    let new_seats: Vec<NewSeat> = seat_ids
        .iter()
        .enumerate()
        .map(|(i, id)| NewSeat {
            seat_id: *id,
            seat_number: format!("A{}", i + 1),
        })
        .collect();
    seats.init_seats_for_trip(trip_id, &new_seats).await.unwrap();

    let trips = Arc::new(StaticTripDirectory::new());
    trips.insert_trip(
        TripInfo {
            id: trip_id,
            base_price: 100_000,
            departure_at: Utc::now() + chrono::Duration::days(2),
        },
        seat_ids
            .iter()
            .enumerate()
            .map(|(i, id)| SeatInfo {
                id: *id,
                seat_number: format!("A{}", i + 1),
                price_multiplier: if i == 0 { 1.5 } else { 1.0 },
            })
            .collect(),
    );

    let gateway = Arc::new(MockPaymentGateway::new());
    let transactions = Arc::new(InMemoryTransactionRepository::new());
    let notifier = Arc::new(NotificationPool::new(
        Arc::new(RecordingNotifier::new()),
        16,
    ));
    let orchestrator = Arc::new(BookingOrchestrator::new(
        Arc::new(InMemoryBookingRepository::new()),
        transactions.clone(),
        Arc::new(InMemoryRefundRepository::new()),
        seats.clone(),
        trips,
        gateway.clone(),
        notifier,
        BookingPolicy::default(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        gateway.clone(),
        transactions,
        orchestrator.clone(),
    ));
    let locks = Arc::new(SeatLockManager::new(
        Arc::new(InMemorySeatLockStore::new()),
        Duration::from_secs(300),
        Duration::from_secs(2),
    ));

    let state = AppState {
        locks,
        seats,
        bookings: orchestrator,
        webhooks,
    };
    TestApp {
        router: app(state),
        gateway,
        trip_id,
        seat_ids,
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_booking(app: &TestApp, seat_idx: &[usize]) -> serde_json::Value {
    let passengers: Vec<serde_json::Value> = seat_idx
        .iter()
        .map(|i| {
            serde_json::json!({
                "full_name": format!("Passenger {i}"),
                "seat_id": app.seat_ids[*i],
            })
        })
        .collect();
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/bookings",
            serde_json::json!({
                "trip_id": app.trip_id,
                "contact_email": "rider@example.com",
                "passengers": passengers,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await
}

fn paid_payload(app: &TestApp, booking: &serde_json::Value) -> WebhookPayload {
    let checkout = booking["checkout_url"].as_str().unwrap();
    // mock checkout urls end in the payment link id, mock_pl_{order_code}
    let payment_link_id = checkout.rsplit('/').next().unwrap().to_string();
    let order_code: i64 = payment_link_id
        .strip_prefix("mock_pl_")
        .unwrap()
        .parse()
        .unwrap();
    app.gateway
        .set_link_status(&payment_link_id, PaymentLinkStatus::Paid);
    let data = WebhookData {
        order_code,
        payment_link_id,
        status: PaymentLinkStatus::Paid,
        reference: Some("FT0042".into()),
        transaction_time: Some(Utc::now()),
    };
    WebhookPayload {
        signature: MockPaymentGateway::sign(&data),
        data,
    }
}

#[tokio::test]
async fn test_seat_lock_conflict_and_release() {
    let app = test_app().await;
    let uri = format!("/v1/trips/{}/seat-locks", app.trip_id);

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            serde_json::json!({
                "seat_ids": [app.seat_ids[0], app.seat_ids[1]],
                "session_id": "session-a",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Overlapping set from another session: all-or-nothing refusal.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            serde_json::json!({
                "seat_ids": [app.seat_ids[1], app.seat_ids[2]],
                "session_id": "session-b",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // After the holder releases, the same set succeeds.
    let response = app
        .router
        .clone()
        .oneshot(empty_request("DELETE", "/v1/seat-locks/session-a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            serde_json::json!({
                "seat_ids": [app.seat_ids[1], app.seat_ids[2]],
                "session_id": "session-b",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_seat_map_shows_locks_and_status() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/trips/{}/seat-locks", app.trip_id),
            serde_json::json!({
                "seat_ids": [app.seat_ids[3]],
                "session_id": "browser-1",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/v1/trips/{}/seats", app.trip_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let seats = body["seats"].as_array().unwrap();
    assert_eq!(seats.len(), 4);

    let locked_seat = seats
        .iter()
        .find(|s| s["seat_id"] == serde_json::json!(app.seat_ids[3]))
        .unwrap();
    assert_eq!(locked_seat["status"], "available");
    assert_eq!(locked_seat["locked"], true);
}

#[tokio::test]
async fn test_booking_paid_webhook_flow() {
    let app = test_app().await;

    // Seat 0 carries the 1.5 multiplier.
    let booking = create_booking(&app, &[0, 1]).await;
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["total_amount"], 250_000);
    assert!(booking["checkout_url"].as_str().is_some());

    let payload = paid_payload(&app, &booking);
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/webhooks/payment",
            serde_json::to_value(&payload).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let booking_id = booking["id"].as_str().unwrap();
    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", &format!("/v1/bookings/{booking_id}")))
        .await
        .unwrap();
    let updated = json_body(response).await;
    assert_eq!(updated["status"], "confirmed");

    // Duplicate delivery is acknowledged without side effects.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/webhooks/payment",
            serde_json::to_value(&payload).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The paid seats are sold in the seat map.
    let response = app
        .router
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/v1/trips/{}/seats", app.trip_id),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    let booked = body["seats"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["status"] == "booked")
        .count();
    assert_eq!(booked, 2);
}

#[tokio::test]
async fn test_webhook_bad_signature_rejected() {
    let app = test_app().await;
    let booking = create_booking(&app, &[1]).await;

    let mut payload = paid_payload(&app, &booking);
    payload.signature = "forged".into();
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/webhooks/payment",
            serde_json::to_value(&payload).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_guest_lookup_email_guard() {
    let app = test_app().await;
    let booking = create_booking(&app, &[1]).await;
    let reference = booking["reference"].as_str().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/v1/bookings/lookup?reference={reference}&email=rider@example.com"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/v1/bookings/lookup?reference={reference}&email=other@example.com"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cancel_blocks_late_webhook() {
    let app = test_app().await;
    let booking = create_booking(&app, &[2]).await;
    let payload = paid_payload(&app, &booking);
    let booking_id = booking["id"].as_str().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/bookings/{booking_id}/cancel"),
            serde_json::json!({ "reason": "changed plans" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = json_body(response).await;
    assert_eq!(cancelled["status"], "cancelled");

    // Cancelling again is an invalid state transition.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/bookings/{booking_id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // A late paid webhook is acknowledged but cannot resurrect it.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/webhooks/payment",
            serde_json::to_value(&payload).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", &format!("/v1/bookings/{booking_id}")))
        .await
        .unwrap();
    let after = json_body(response).await;
    assert_eq!(after["status"], "cancelled");
}

#[tokio::test]
async fn test_gateway_failure_then_retry() {
    let app = test_app().await;
    app.gateway.set_fail_create(true);

    let booking = create_booking(&app, &[1]).await;
    assert_eq!(booking["status"], "failed");
    let booking_id = booking["id"].as_str().unwrap();

    app.gateway.set_fail_create(false);
    let response = app
        .router
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/v1/bookings/{booking_id}/retry-payment"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let transaction = json_body(response).await;
    assert_eq!(transaction["amount"], 100_000);
    assert!(transaction["checkout_url"].as_str().is_some());
}

#[tokio::test]
async fn test_seat_map_init_route_rejects_duplicates() {
    let app = test_app().await;
    let new_trip = Uuid::new_v4();
    let body = serde_json::json!({
        "seats": [
            { "seat_id": Uuid::new_v4(), "seat_number": "B1" },
            { "seat_id": Uuid::new_v4(), "seat_number": "B2" },
        ]
    });

    let uri = format!("/v1/trips/{new_trip}/seats:init");
    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", &uri, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", &uri, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

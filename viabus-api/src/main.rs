use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use viabus_api::{app, worker, AppState};
use viabus_booking::{BookingOrchestrator, BookingPolicy, WebhookProcessor};
use viabus_core::memory::LoggingNotifier;
use viabus_core::repository::SeatLockStore;
use viabus_seats::{SeatAvailabilityService, SeatLockManager};
use viabus_store::{
    DbClient, HttpPaymentGateway, PgBookingRepository, PgRefundRepository, PgSeatRepository,
    PgTransactionRepository, RedisSeatLockStore,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "viabus=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = viabus_store::Config::load().expect("Failed to load config");
    let rules = config.business_rules.clone();
    tracing::info!("Starting ViaBus API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let lock_store: Arc<dyn SeatLockStore> = Arc::new(
        RedisSeatLockStore::new(&config.redis.url)
            .await
            .expect("Failed to connect to Redis"),
    );
    let gateway = Arc::new(
        HttpPaymentGateway::new(&config.payment).expect("Failed to build payment gateway"),
    );

    let seat_repo = Arc::new(PgSeatRepository::new(db.pool.clone()));
    let booking_repo = Arc::new(PgBookingRepository::new(db.pool.clone()));
    let transaction_repo = Arc::new(PgTransactionRepository::new(db.pool.clone()));
    let refund_repo = Arc::new(PgRefundRepository::new(db.pool.clone()));

    let op_timeout = Duration::from_secs(rules.store_timeout_seconds);
    let locks = Arc::new(SeatLockManager::new(
        lock_store.clone(),
        Duration::from_secs(rules.seat_lock_seconds),
        op_timeout,
    ));
    let seats = Arc::new(SeatAvailabilityService::new(
        seat_repo,
        Duration::from_secs(rules.seat_reservation_seconds),
    ));

    let notifier = Arc::new(worker::NotificationPool::new(
        Arc::new(LoggingNotifier),
        rules.notification_queue_size,
    ));

    // TODO: back TripDirectory with the trips service once its API is up;
    // until then trips are seeded via configuration/fixtures.
    let trips = Arc::new(viabus_core::memory::StaticTripDirectory::new());

    let orchestrator = Arc::new(BookingOrchestrator::new(
        booking_repo,
        transaction_repo.clone(),
        refund_repo,
        seats.clone(),
        trips,
        gateway.clone(),
        notifier,
        BookingPolicy {
            booking_ttl: Duration::from_secs(rules.booking_ttl_seconds),
            retry_grace: Duration::from_secs(rules.retry_grace_seconds),
            reservation_ttl: Duration::from_secs(rules.seat_reservation_seconds),
            ..BookingPolicy::default()
        },
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        gateway,
        transaction_repo,
        orchestrator.clone(),
    ));

    tokio::spawn(worker::start_maintenance_worker(
        seats.clone(),
        lock_store,
        Duration::from_secs(rules.sweep_interval_seconds),
    ));

    let state = AppState {
        locks,
        seats,
        bookings: orchestrator,
        webhooks,
    };
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}

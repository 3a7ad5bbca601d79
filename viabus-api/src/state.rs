use std::sync::Arc;

use viabus_booking::{BookingOrchestrator, WebhookProcessor};
use viabus_seats::{SeatAvailabilityService, SeatLockManager};

#[derive(Clone)]
pub struct AppState {
    pub locks: Arc<SeatLockManager>,
    pub seats: Arc<SeatAvailabilityService>,
    pub bookings: Arc<BookingOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
}

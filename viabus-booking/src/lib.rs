pub mod orchestrator;
pub mod reference;
pub mod webhook;

pub use orchestrator::{BookingOrchestrator, BookingPolicy, CreateBookingRequest};
pub use webhook::WebhookProcessor;

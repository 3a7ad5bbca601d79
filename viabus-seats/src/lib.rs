pub mod availability;
pub mod lock;

pub use availability::SeatAvailabilityService;
pub use lock::SeatLockManager;

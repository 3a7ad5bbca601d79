pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod gateway;
pub mod redis_lock;
pub mod seat_repo;

pub use app_config::Config;
pub use booking_repo::{PgBookingRepository, PgRefundRepository, PgTransactionRepository};
pub use database::DbClient;
pub use gateway::HttpPaymentGateway;
pub use redis_lock::RedisSeatLockStore;
pub use seat_repo::PgSeatRepository;

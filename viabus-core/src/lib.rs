pub mod error;
pub mod memory;
pub mod models;
pub mod notify;
pub mod payment;
pub mod repository;
pub mod trip;

pub use error::{CoreError, CoreResult};

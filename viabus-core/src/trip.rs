use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;

/// Read-only pricing and seat-map data owned by the trip service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripInfo {
    pub id: Uuid,
    /// Base seat price, integer minor units.
    pub base_price: i64,
    pub departure_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatInfo {
    pub id: Uuid,
    pub seat_number: String,
    pub price_multiplier: f64,
}

#[async_trait]
pub trait TripDirectory: Send + Sync {
    async fn get_trip(&self, trip_id: Uuid) -> CoreResult<TripInfo>;

    async fn list_seats(&self, trip_id: Uuid, seat_ids: &[Uuid]) -> CoreResult<Vec<SeatInfo>>;
}

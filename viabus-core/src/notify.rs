use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;

/// Fire-and-forget booking outcome messages. Delivery failures are logged
/// by the dispatching side and never block a state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingNotification {
    Confirmed {
        booking_id: Uuid,
        reference: String,
        contact_email: Option<String>,
    },
    Cancelled {
        booking_id: Uuid,
        reference: String,
        reason: String,
        contact_email: Option<String>,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: BookingNotification) -> CoreResult<()>;
}

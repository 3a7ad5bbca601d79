use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use async_trait::async_trait;
use viabus_core::error::CoreResult;
use viabus_core::notify::{BookingNotification, Notifier};
use viabus_core::repository::SeatLockStore;
use viabus_seats::SeatAvailabilityService;

/// Periodic hygiene: demote lapsed seat reservations and purge dead lock
/// entries. Correctness never depends on this loop; lazy expiry on the
/// read path already handles both. Failures are logged and the next tick
/// runs anyway.
pub async fn start_maintenance_worker(
    seats: Arc<SeatAvailabilityService>,
    locks: Arc<dyn SeatLockStore>,
    interval: Duration,
) {
    info!(interval_secs = interval.as_secs(), "maintenance worker started");
    loop {
        sleep(interval).await;

        match seats.sweep_expired_reservations().await {
            Ok(released) if released > 0 => {
                info!(released, "reservation sweep released seats");
            }
            Ok(_) => {}
            Err(e) => error!("reservation sweep failed: {}", e),
        }

        match locks.purge_expired().await {
            Ok(purged) if purged > 0 => info!(purged, "purged expired seat locks"),
            Ok(_) => {}
            Err(e) => error!("lock purge failed: {}", e),
        }
    }
}

/// Bounded queue in front of the real notifier so a slow transport can
/// never stall a booking transition. Saturation drops the message with a
/// warning; notifications are fire-and-forget by contract.
pub struct NotificationPool {
    tx: mpsc::Sender<BookingNotification>,
}

impl NotificationPool {
    pub fn new(inner: Arc<dyn Notifier>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<BookingNotification>(capacity);
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = inner.notify(notification).await {
                    warn!("notification delivery failed: {}", e);
                }
            }
        });
        Self { tx }
    }
}

#[async_trait]
impl Notifier for NotificationPool {
    async fn notify(&self, notification: BookingNotification) -> CoreResult<()> {
        if let Err(e) = self.tx.try_send(notification) {
            warn!("notification queue saturated, dropping message: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use viabus_core::memory::RecordingNotifier;

    #[tokio::test]
    async fn test_pool_delivers_to_inner_notifier() {
        let inner = Arc::new(RecordingNotifier::new());
        let pool = NotificationPool::new(inner.clone(), 8);

        pool.notify(BookingNotification::Confirmed {
            booking_id: Uuid::new_v4(),
            reference: "BK260101TEST".into(),
            contact_email: None,
        })
        .await
        .unwrap();

        // Drain happens on a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(inner.sent().len(), 1);
    }
}

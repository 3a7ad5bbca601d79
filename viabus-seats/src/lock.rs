use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::repository::SeatLockStore;

/// Default interactive lock: 5 minutes of seat selection.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Short-TTL exclusive seat claims during interactive selection, before a
/// booking exists. The store's multi-key acquire is atomic; this manager
/// owns the TTL policy and the per-call deadline.
pub struct SeatLockManager {
    store: Arc<dyn SeatLockStore>,
    lock_ttl: Duration,
    op_timeout: Duration,
}

impl SeatLockManager {
    pub fn new(store: Arc<dyn SeatLockStore>, lock_ttl: Duration, op_timeout: Duration) -> Self {
        Self {
            store,
            lock_ttl,
            op_timeout,
        }
    }

    pub fn with_defaults(store: Arc<dyn SeatLockStore>) -> Self {
        Self::new(store, DEFAULT_LOCK_TTL, Duration::from_secs(3))
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Acquire a lock on every seat in the set, or none. A timed-out
    /// store call counts as a failure to lock, with the session's partial
    /// state released.
    pub async fn lock_seats(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
    ) -> CoreResult<DateTime<Utc>> {
        if seat_ids.is_empty() {
            return Err(CoreError::InvalidState("no seats requested".into()));
        }
        let unique: HashSet<Uuid> = seat_ids.iter().copied().collect();
        if unique.len() != seat_ids.len() {
            return Err(CoreError::InvalidState(
                "duplicate seats in lock request".into(),
            ));
        }

        let acquire = self
            .store
            .try_lock_all(trip_id, seat_ids, session_id, self.lock_ttl);
        let acquired = match tokio::time::timeout(self.op_timeout, acquire).await {
            Ok(result) => result?,
            Err(_) => {
                // The store may or may not have applied the write before
                // the deadline; releasing the requested seats keeps either
                // way consistent. Scoped to this request so locks the
                // session already holds on other seats survive.
                let _ = self
                    .store
                    .unlock_seats(trip_id, seat_ids, session_id)
                    .await;
                return Err(CoreError::Timeout(format!(
                    "seat lock acquisition for trip {trip_id}"
                )));
            }
        };

        if !acquired {
            debug!(%trip_id, session_id, "seat lock conflict");
            return Err(CoreError::Conflict(
                "one or more seats are locked by another session".into(),
            ));
        }

        let expires_at = Utc::now()
            + ChronoDuration::from_std(self.lock_ttl)
                .map_err(|e| CoreError::internal("lock ttl out of range", e))?;
        info!(%trip_id, session_id, seats = seat_ids.len(), "seats locked");
        Ok(expires_at)
    }

    /// Release every lock owned by the session. Idempotent.
    pub async fn unlock_seats(&self, session_id: &str) -> CoreResult<()> {
        tokio::time::timeout(self.op_timeout, self.store.unlock_session(session_id))
            .await
            .map_err(|_| CoreError::Timeout(format!("unlock for session {session_id}")))??;
        debug!(session_id, "session locks released");
        Ok(())
    }

    /// Read-only snapshot; entries past TTL are implicitly absent.
    pub async fn locked_seats(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>> {
        tokio::time::timeout(self.op_timeout, self.store.locked_seats(trip_id))
            .await
            .map_err(|_| CoreError::Timeout(format!("locked seats for trip {trip_id}")))?
    }

    /// Pre-check used right before booking creation, distinct from the
    /// write-path lock. A lock held by the same session is not a conflict.
    pub async fn validate_seat_availability(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
    ) -> CoreResult<()> {
        for seat_id in seat_ids {
            let holder =
                tokio::time::timeout(self.op_timeout, self.store.holder(trip_id, *seat_id))
                    .await
                    .map_err(|_| CoreError::Timeout(format!("lock check for seat {seat_id}")))??;
            if let Some(holder) = holder {
                if holder != session_id {
                    return Err(CoreError::Conflict(format!(
                        "seat {seat_id} is locked by another session"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Shared error taxonomy for the booking core.
///
/// Every store and collaborator failure is folded into one of these
/// variants before it crosses a crate boundary, so the API layer can map
/// errors to HTTP statuses with a single exhaustive match.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Seat already locked/booked, duplicate refund, seat map already
    /// initialized. Never retried automatically.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Action not permitted in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The resource exists but does not belong to the caller. Reported
    /// distinctly from NotFound so existence is not leaked.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Payment provider call failed.
    #[error("payment provider failure: {0}")]
    Upstream(String),

    /// Webhook authenticity failure. Fatal for that request.
    #[error("invalid webhook signature")]
    SignatureInvalid,

    /// Retry attempted on a booking expired past the grace window.
    #[error("booking expired beyond the retry grace period")]
    ExpiredBeyondGrace,

    /// A store operation exceeded its deadline. Treated as failure by
    /// every caller; a timed-out lock acquisition is not a lock.
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        CoreError::Internal(format!("{context}: {err}"))
    }

    pub fn upstream(context: &str, err: impl std::fmt::Display) -> Self {
        CoreError::Upstream(format!("{context}: {err}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

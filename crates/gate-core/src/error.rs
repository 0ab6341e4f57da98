//! Error types for the lock store.

use thiserror::Error;

/// Errors raised by [`crate::store::LockStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A caller-supplied argument failed validation (bad mode, empty path, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No lock or queue entry exists for the given identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller does not own the lock it tried to release or heartbeat.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The caller previously held this lock_id but it was reclaimed after
    /// exceeding its `max_hold_ms` cap, distinct from an ordinary lease expiry.
    #[error("lock {0} exceeded its max hold time and was reclaimed")]
    HoldCapExceeded(String),

    /// The backing store failed (I/O, corruption, schema mismatch).
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_found() {
        let err = StoreError::NotFound("lock-1".into());
        assert!(err.is_not_found());
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn classifies_permission_denied() {
        let err = StoreError::PermissionDenied("lock-1".into());
        assert!(err.is_permission_denied());
    }
}

//! Error types for lock acquisition, renewal and release.

use std::time::Duration;

/// Failure reported by a [`LeaseStore`](crate::store::LeaseStore) backend.
///
/// These are connectivity or protocol problems, never contention. They are
/// carried through [`LockError::Store`] untouched.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store protocol error: {0}")]
    Protocol(String),
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Error type for locker and lock operations.
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// The resource is held by someone else. Covers a rejected claim under the
    /// no-retry policy, exhausted retries, and a strategy asking to stop.
    #[error("locker: locked")]
    Locked,
    /// The stored value no longer matches this lock's token, or the key is gone.
    #[error("locker: lock not held")]
    NotHeld,
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The caller's cancellation token fired while obtaining.
    #[error("locker: obtain cancelled")]
    Cancelled,
    #[error("locker: release did not complete within {0:?}")]
    ReleaseTimeout(Duration),
    #[error("locker: key must not be empty")]
    EmptyKey,
    #[error("locker: a lease store is required")]
    MissingStore,
}

impl LockError {
    /// Returns true for the contention error.
    pub fn is_locked(&self) -> bool {
        matches!(self, LockError::Locked)
    }

    /// Returns true when the lock was not (or no longer) held.
    pub fn is_not_held(&self) -> bool {
        matches!(self, LockError::NotHeld)
    }
}

pub type Result<T, E = LockError> = std::result::Result<T, E>;

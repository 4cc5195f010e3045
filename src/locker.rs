//! Lock Acquisition
//!
//! [`Locker`] claims keys in the shared store, retrying under contention as
//! the configured [`RetryStrategy`](crate::retry::RetryStrategy) dictates.

use crate::builder::LockerBuilder;
use crate::error::{LockError, Result};
use crate::lock::{Lock, RELEASE_TIMEOUT, RENEWAL_MARGIN};
use crate::metrics::LockMetrics;
use crate::options::{default_options, LockOption, LockOptions};
use crate::store::{DeleteOutcome, LeaseStore};
use futures::FutureExt;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Length of the ownership token. 22 alphanumeric characters carry more
/// than 128 bits.
pub const TOKEN_LEN: usize = 22;

/// Entry point for obtaining locks from a shared store.
///
/// Safe to share between tasks; clones use the same store and metrics.
#[derive(Clone)]
pub struct Locker {
    store: Arc<dyn LeaseStore>,
    options: Option<Arc<LockOptions>>,
    metrics: LockMetrics,
}

impl std::fmt::Debug for Locker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locker")
            .field("options", &self.options)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Locker {
    /// Creates a locker that resolves options from the process-wide default
    /// on every call.
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            options: None,
            metrics: LockMetrics::new(),
        }
    }

    pub fn builder() -> LockerBuilder {
        LockerBuilder::new()
    }

    pub(crate) fn from_parts(
        store: Arc<dyn LeaseStore>,
        options: Option<LockOptions>,
        metrics: LockMetrics,
    ) -> Self {
        Self {
            store,
            options: options.map(Arc::new),
            metrics,
        }
    }

    pub fn metrics(&self) -> &LockMetrics {
        &self.metrics
    }

    /// Snapshot of the base options merged with `overrides`.
    pub fn resolve_options<I>(&self, overrides: I) -> LockOptions
    where
        I: IntoIterator<Item = LockOption>,
    {
        let base = match &self.options {
            Some(pinned) => LockOptions::clone(pinned),
            None => default_options(),
        };
        base.with_overrides(overrides)
    }

    /// Claims `key`, retrying under contention.
    ///
    /// On success the returned lock renews itself in the background when
    /// auto-renew is on and the TTL is longer than one second. The renewal
    /// task stops when the lock is released or when `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`LockError::Locked`] when the key stays held past the retry budget,
    ///   or the strategy declines to retry
    /// - [`LockError::Cancelled`] when `cancel` fires before the claim lands; a
    ///   claim already in flight is deleted again on a best-effort basis
    /// - [`LockError::Store`] as soon as the store fails; store errors are not retried
    pub async fn obtain<I>(&self, cancel: &CancellationToken, key: &str, overrides: I) -> Result<Lock>
    where
        I: IntoIterator<Item = LockOption>,
    {
        if key.is_empty() {
            return Err(LockError::EmptyKey);
        }

        let options = Arc::new(self.resolve_options(overrides));
        let store_key = options.store_key(key);
        let token = random_token();
        let max_retries = options.max_retries;

        self.metrics.inc_obtains();

        for attempt in 0..=max_retries {
            if attempt > 0 {
                options.logger.info(
                    "locker: retry lock",
                    &[("key", &store_key), ("times", &attempt), ("max_times", &max_retries)],
                );
            }

            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }

            let claimed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abandon_claim(&store_key, &token).await;
                    return Err(LockError::Cancelled);
                }
                claimed = self.store.set_if_absent(&store_key, &token, options.ttl) => claimed?,
            };

            if claimed {
                self.metrics.inc_obtains_succeeded();
                tracing::debug!(key = %store_key, attempt, "Lock obtained");

                let mut lock = Lock::new(
                    Arc::clone(&self.store),
                    store_key,
                    token,
                    Arc::clone(&options),
                    self.metrics.clone(),
                    cancel.child_token(),
                );
                if options.auto_renew && options.ttl > RENEWAL_MARGIN {
                    lock.start_renewal();
                }
                return Ok(lock);
            }

            if attempt == max_retries {
                break;
            }

            let Some(backoff) = options.retry_strategy.next_backoff() else {
                break;
            };

            self.metrics.inc_retry_waits();
            tracing::debug!(
                key = %store_key,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Lock held, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        self.metrics.inc_contention();
        Err(LockError::Locked)
    }

    /// Deletes a claim that may have landed after its future was dropped.
    async fn abandon_claim(&self, store_key: &str, token: &str) {
        let outcome = tokio::time::timeout(
            RELEASE_TIMEOUT,
            self.store.compare_and_delete(store_key, token),
        )
        .await;

        match outcome {
            Ok(Ok(DeleteOutcome::Deleted)) => {
                tracing::debug!(key = %store_key, "Removed claim abandoned by cancellation");
            }
            Ok(Ok(DeleteOutcome::Mismatched | DeleteOutcome::Absent)) => {}
            Ok(Err(e)) => {
                tracing::warn!(key = %store_key, error = %e, "Failed to remove abandoned claim");
            }
            Err(_) => {
                tracing::warn!(key = %store_key, "Timed out removing abandoned claim");
            }
        }
    }

    /// Runs `work` while holding `key`.
    ///
    /// The lock is released on every exit path of `work`: success, error and
    /// panic (the panic is resumed after the release). If the returned future
    /// is dropped mid-work, the release is handed to the runtime. Release
    /// failures are logged through the lock's logger, never returned.
    ///
    /// `work` receives a child of `cancel`.
    pub async fn with_lock<I, F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        overrides: I,
        work: F,
    ) -> Result<T, E>
    where
        I: IntoIterator<Item = LockOption>,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let lock = self.obtain(cancel, key, overrides).await?;
        let guard = ReleaseGuard { lock: Some(lock) };

        let token = cancel.child_token();
        let outcome = AssertUnwindSafe(async move { work(token).await })
            .catch_unwind()
            .await;

        guard.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Releases its lock when dropped without an explicit release.
struct ReleaseGuard {
    lock: Option<Lock>,
}

impl ReleaseGuard {
    async fn release(mut self) {
        if let Some(lock) = self.lock.take() {
            lock.silent_release().await;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { lock.silent_release().await });
            }
            Err(_) => {
                tracing::warn!(key = %lock.key(), "No runtime to release lock, leaving lease to expire");
            }
        }
    }
}

/// Generates an ownership token from the thread-local CSPRNG.
fn random_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

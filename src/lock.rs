//! Held Locks
//!
//! A [`Lock`] is the handle for one successful acquisition. It owns the
//! background renewal task and is the only party able to extend or delete its
//! store entry, because the store compares the entry against the lock's token.

use crate::error::{LockError, Result};
use crate::metrics::LockMetrics;
use crate::options::LockOptions;
use crate::store::{DeleteOutcome, LeaseStore};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fixed budget for a release, independent of any caller cancellation.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Renewals fire this long before the lease would lapse.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(1);

/// Renewal intervals at or below this are not started.
pub const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(200);

/// State shared between a lock handle and its renewal task.
struct LockState {
    store: Arc<dyn LeaseStore>,
    key: String,
    token: String,
    options: Arc<LockOptions>,
    renewals: AtomicU32,
    metrics: LockMetrics,
}

impl LockState {
    async fn refresh(&self) -> Result<()> {
        let extended = self
            .store
            .compare_and_extend(&self.key, &self.token, self.options.ttl)
            .await?;

        if extended {
            Ok(())
        } else {
            Err(LockError::Locked)
        }
    }
}

/// A held lease on a store key.
pub struct Lock {
    state: Arc<LockState>,
    cancel_renewal: CancellationToken,
    renewal: Option<JoinHandle<()>>,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.state.key)
            .field("ttl", &self.state.options.ttl)
            .field("renewals", &self.renewal_count())
            .finish_non_exhaustive()
    }
}

impl Lock {
    pub(crate) fn new(
        store: Arc<dyn LeaseStore>,
        key: String,
        token: String,
        options: Arc<LockOptions>,
        metrics: LockMetrics,
        cancel_renewal: CancellationToken,
    ) -> Self {
        Self {
            state: Arc::new(LockState {
                store,
                key,
                token,
                options,
                renewals: AtomicU32::new(0),
                metrics,
            }),
            cancel_renewal,
            renewal: None,
        }
    }

    /// The store key, prefix included.
    pub fn key(&self) -> &str {
        &self.state.key
    }

    /// The ownership token written to the store.
    pub fn token(&self) -> &str {
        &self.state.token
    }

    pub fn ttl(&self) -> Duration {
        self.state.options.ttl
    }

    /// Options snapshot this lock was created with.
    pub fn options(&self) -> &LockOptions {
        &self.state.options
    }

    /// Renewals performed by the background task so far.
    pub fn renewal_count(&self) -> u32 {
        self.state.renewals.load(Ordering::Acquire)
    }

    /// Returns true while the background renewal task is running.
    pub fn is_renewing(&self) -> bool {
        self.renewal.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Pushes the expiry of the store entry out by one TTL.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Locked`] if the entry no longer carries this
    /// lock's token or is gone. Store failures are returned unchanged.
    pub async fn refresh(&self) -> Result<()> {
        self.state.refresh().await
    }

    /// Stops renewal and deletes the store entry if it still carries this
    /// lock's token.
    ///
    /// Completes within [`RELEASE_TIMEOUT`] regardless of the caller's own
    /// cancellation state.
    ///
    /// # Errors
    ///
    /// - [`LockError::NotHeld`] if the entry was released, expired, or taken over
    /// - [`LockError::ReleaseTimeout`] if the store did not answer in time
    /// - [`LockError::Store`] for any other store failure
    pub async fn release(&self) -> Result<()> {
        self.cancel_renewal.cancel();
        self.state.metrics.inc_releases();

        let result = match tokio::time::timeout(
            RELEASE_TIMEOUT,
            self.state.store.compare_and_delete(&self.state.key, &self.state.token),
        )
        .await
        {
            Ok(Ok(DeleteOutcome::Deleted)) => Ok(()),
            Ok(Ok(DeleteOutcome::Mismatched | DeleteOutcome::Absent)) => Err(LockError::NotHeld),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(LockError::ReleaseTimeout(RELEASE_TIMEOUT)),
        };

        match &result {
            Ok(()) => tracing::debug!(key = %self.state.key, "Lock released"),
            Err(_) => self.state.metrics.inc_releases_failed(),
        }
        result
    }

    /// Releases the lock, downgrading any failure to a warning.
    pub async fn silent_release(&self) {
        if let Err(e) = self.release().await {
            self.state.options.logger.warn(
                "locker: release lock failed",
                &[("key", &self.state.key), ("error", &e)],
            );
        }
    }

    /// Starts the renewal task bound to this lock's cancellation token.
    ///
    /// Nothing is started when the renewal interval would be too short to be
    /// safe.
    pub(crate) fn start_renewal(&mut self) {
        let ttl = self.state.options.ttl;
        let interval = ttl.saturating_sub(RENEWAL_MARGIN);

        if interval < RENEWAL_MARGIN {
            self.state.options.logger.warn(
                "locker: lock duration is short, renewal may fail",
                &[("key", &self.state.key), ("ttl_ms", &ttl.as_millis())],
            );
        }
        if interval <= MIN_RENEWAL_INTERVAL {
            return;
        }

        let state = Arc::clone(&self.state);
        let cancel = self.cancel_renewal.clone();
        self.renewal = Some(tokio::spawn(run_renewal(state, cancel, interval)));
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        // An unreleased lease is left to expire on its own.
        self.cancel_renewal.cancel();
    }
}

async fn run_renewal(state: Arc<LockState>, cancel: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(
        key = %state.key,
        interval_ms = interval.as_millis() as u64,
        "Starting lease renewal"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if state.renewals.load(Ordering::Acquire) >= state.options.max_renewals {
            tracing::debug!(key = %state.key, "Renewal limit reached, letting lease expire");
            break;
        }
        let renewals = state.renewals.fetch_add(1, Ordering::AcqRel) + 1;
        state.metrics.inc_renewals();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = state.refresh() => result,
        };

        match result {
            Ok(()) => {
                tracing::debug!(key = %state.key, renewals, "Lease renewed");
            }
            Err(LockError::Locked) => {
                state.metrics.inc_renewals_failed();
                state.options.logger.warn(
                    "locker: refresh failed",
                    &[("key", &state.key), ("renewals", &renewals), ("error", &LockError::Locked)],
                );
                break;
            }
            Err(e) => {
                state.metrics.inc_renewals_failed();
                tracing::warn!(key = %state.key, renewals, error = %e, "Lease renewal failed");
                break;
            }
        }
    }

    tracing::debug!(key = %state.key, "Lease renewal stopped");
}

//! Lock Metrics
//!
//! Atomic counters shared by a [`Locker`](crate::Locker) and every lock it
//! hands out, with export in the Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock lifecycle counters.
///
/// Cloning is cheap; clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct LockMetrics {
    inner: Arc<LockMetricsInner>,
}

#[derive(Debug, Default)]
struct LockMetricsInner {
    obtains_total: AtomicU64,
    obtains_succeeded: AtomicU64,
    contention_total: AtomicU64,
    retry_waits: AtomicU64,
    renewals_total: AtomicU64,
    renewals_failed: AtomicU64,
    releases_total: AtomicU64,
    releases_failed: AtomicU64,
}

impl LockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // COUNTER INCREMENTERS
    // ========================================================================

    pub(crate) fn inc_obtains(&self) {
        self.inner.obtains_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_obtains_succeeded(&self) {
        self.inner.obtains_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_contention(&self) {
        self.inner.contention_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retry_waits(&self) {
        self.inner.retry_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_renewals(&self) {
        self.inner.renewals_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_renewals_failed(&self) {
        self.inner.renewals_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_releases(&self) {
        self.inner.releases_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_releases_failed(&self) {
        self.inner.releases_failed.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // GETTERS
    // ========================================================================

    pub fn obtains_total(&self) -> u64 {
        self.inner.obtains_total.load(Ordering::Relaxed)
    }
    pub fn obtains_succeeded(&self) -> u64 {
        self.inner.obtains_succeeded.load(Ordering::Relaxed)
    }
    pub fn contention_total(&self) -> u64 {
        self.inner.contention_total.load(Ordering::Relaxed)
    }
    pub fn retry_waits(&self) -> u64 {
        self.inner.retry_waits.load(Ordering::Relaxed)
    }
    pub fn renewals_total(&self) -> u64 {
        self.inner.renewals_total.load(Ordering::Relaxed)
    }
    pub fn renewals_failed(&self) -> u64 {
        self.inner.renewals_failed.load(Ordering::Relaxed)
    }
    pub fn releases_total(&self) -> u64 {
        self.inner.releases_total.load(Ordering::Relaxed)
    }
    pub fn releases_failed(&self) -> u64 {
        self.inner.releases_failed.load(Ordering::Relaxed)
    }

    // ========================================================================
    // PROMETHEUS EXPORT
    // ========================================================================

    /// Exports counters in Prometheus text format.
    pub fn to_prometheus_text(&self) -> String {
        let mut output = String::new();

        macro_rules! counter {
            ($name:expr, $help:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
                    $name, $help, $name, $name, $value
                ));
            };
        }

        counter!("lock_obtains_total", "Obtain calls", self.obtains_total());
        counter!(
            "lock_obtains_succeeded_total",
            "Obtain calls that acquired the lock",
            self.obtains_succeeded()
        );
        counter!(
            "lock_contention_total",
            "Obtain calls that failed because the lock was held",
            self.contention_total()
        );
        counter!(
            "lock_retry_waits_total",
            "Backoff waits between contended claims",
            self.retry_waits()
        );
        counter!("lock_renewals_total", "Background lease renewals", self.renewals_total());
        counter!(
            "lock_renewals_failed_total",
            "Background renewals that failed",
            self.renewals_failed()
        );
        counter!("lock_releases_total", "Release calls", self.releases_total());
        counter!(
            "lock_releases_failed_total",
            "Release calls that returned an error",
            self.releases_failed()
        );

        output
    }
}

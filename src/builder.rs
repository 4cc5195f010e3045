use crate::error::{LockError, Result};
use crate::locker::Locker;
use crate::metrics::LockMetrics;
use crate::options::{default_options, LockOptions};
use crate::store::LeaseStore;
use std::sync::Arc;

/// Builder for [`Locker`].
///
/// Options set here are pinned into the locker, so later changes to the
/// process-wide default do not affect it. Without any options call the
/// locker follows the process-wide default.
#[derive(Default)]
pub struct LockerBuilder {
    store: Option<Arc<dyn LeaseStore>>,
    options: Option<LockOptions>,
    metrics: Option<LockMetrics>,
}

impl LockerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lease store (Required).
    pub fn store(mut self, store: impl LeaseStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets a lease store that is shared with other owners.
    pub fn shared_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Pins the base options.
    pub fn options(mut self, options: LockOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Modifies the pinned options via a closure.
    ///
    /// Starts from a snapshot of the process-wide default if no options were
    /// pinned yet.
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut LockOptions),
    {
        let mut options = self.options.take().unwrap_or_else(default_options);
        f(&mut options);
        self.options = Some(options);
        self
    }

    /// Shares an existing metrics instance.
    pub fn metrics(mut self, metrics: LockMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the `Locker`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::MissingStore`] if no store was given.
    pub fn build(self) -> Result<Locker> {
        let store = self.store.ok_or(LockError::MissingStore)?;

        Ok(Locker::from_parts(
            store,
            self.options,
            self.metrics.unwrap_or_default(),
        ))
    }
}

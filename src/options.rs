//! Lock Configuration
//!
//! [`LockOptions`] is the full, immutable snapshot a lock is created with.
//! [`LockOption`] values override single fields for one call. A process-wide
//! default is kept behind a read/write lock and always handed out by copy, so
//! replacing it never reaches locks that were already obtained.

use crate::logger::{LockLogger, TracingLogger};
use crate::retry::{ExponentialBackoff, LinearBackoff, NoRetry, RetryStrategy};
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Default lease time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Default number of automatic renewals per lock.
pub const DEFAULT_MAX_RENEWALS: u32 = 5;

/// Default number of retries after the first claim.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

static DEFAULT_OPTIONS: LazyLock<RwLock<LockOptions>> =
    LazyLock::new(|| RwLock::new(LockOptions::default()));

/// Resolved lock configuration.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Expiry applied to the store entry
    pub ttl: Duration,
    /// Renew the lease in the background while the lock is held
    pub auto_renew: bool,
    /// Upper bound on background renewals
    pub max_renewals: u32,
    /// Wait policy between contended claims
    pub retry_strategy: Arc<dyn RetryStrategy>,
    /// Retries after the first claim attempt
    pub max_retries: u32,
    /// Namespace prepended to every key as `prefix:key`
    pub prefix: String,
    /// Sink for lifecycle events
    pub logger: Arc<dyn LockLogger>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            auto_renew: true,
            max_renewals: DEFAULT_MAX_RENEWALS,
            retry_strategy: Arc::new(NoRetry),
            max_retries: DEFAULT_MAX_RETRIES,
            prefix: String::new(),
            logger: Arc::new(TracingLogger),
        }
    }
}

impl LockOptions {
    /// Applies overrides in the order given.
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = LockOption>,
    {
        for option in overrides {
            option.apply(&mut self);
        }
        self
    }

    /// Composes the store key for a logical key.
    pub fn store_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }
}

/// Returns a copy of the process-wide default options.
pub fn default_options() -> LockOptions {
    DEFAULT_OPTIONS.read().clone()
}

/// Replaces the process-wide default options.
///
/// Locks obtained earlier keep the snapshot they were created with.
pub fn set_default_options(options: LockOptions) {
    *DEFAULT_OPTIONS.write() = options;
}

/// A single per-call override.
#[derive(Debug, Clone)]
pub enum LockOption {
    Ttl(Duration),
    AutoRenew(bool),
    MaxRenewals(u32),
    RetryStrategy(Arc<dyn RetryStrategy>),
    MaxRetries(u32),
    Prefix(String),
    Logger(Arc<dyn LockLogger>),
}

impl LockOption {
    pub fn ttl(ttl: Duration) -> Self {
        LockOption::Ttl(ttl)
    }

    pub fn auto_renew(enabled: bool) -> Self {
        LockOption::AutoRenew(enabled)
    }

    pub fn max_renewals(count: u32) -> Self {
        LockOption::MaxRenewals(count)
    }

    pub fn retry_strategy(strategy: Arc<dyn RetryStrategy>) -> Self {
        LockOption::RetryStrategy(strategy)
    }

    pub fn max_retries(count: u32) -> Self {
        LockOption::MaxRetries(count)
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        LockOption::Prefix(prefix.into())
    }

    pub fn logger(logger: Arc<dyn LockLogger>) -> Self {
        LockOption::Logger(logger)
    }

    /// Writes this override into `options`.
    pub fn apply(self, options: &mut LockOptions) {
        match self {
            LockOption::Ttl(ttl) => options.ttl = ttl,
            LockOption::AutoRenew(enabled) => options.auto_renew = enabled,
            LockOption::MaxRenewals(count) => options.max_renewals = count,
            LockOption::RetryStrategy(strategy) => options.retry_strategy = strategy,
            LockOption::MaxRetries(count) => options.max_retries = count,
            LockOption::Prefix(prefix) => options.prefix = prefix,
            LockOption::Logger(logger) => options.logger = logger,
        }
    }
}

// ============================================================================
// FILE SETTINGS
// ============================================================================

/// Retry policy as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetrySettings {
    None,
    Linear { interval_ms: u64 },
    Exponential { min_ms: u64, max_ms: u64 },
}

impl RetrySettings {
    pub fn build(&self) -> Arc<dyn RetryStrategy> {
        match self {
            RetrySettings::None => Arc::new(NoRetry),
            RetrySettings::Linear { interval_ms } => {
                Arc::new(LinearBackoff::new(Duration::from_millis(*interval_ms)))
            }
            RetrySettings::Exponential { min_ms, max_ms } => Arc::new(ExponentialBackoff::new(
                Duration::from_millis(*min_ms),
                Duration::from_millis(*max_ms),
            )),
        }
    }
}

/// Plain-data lock settings for loading from application config.
///
/// Missing fields fall back to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub ttl_ms: u64,
    pub auto_renew: bool,
    pub max_renewals: u32,
    pub max_retries: u32,
    pub prefix: String,
    pub retry: RetrySettings,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL.as_millis() as u64,
            auto_renew: true,
            max_renewals: DEFAULT_MAX_RENEWALS,
            max_retries: DEFAULT_MAX_RETRIES,
            prefix: String::new(),
            retry: RetrySettings::None,
        }
    }
}

impl From<LockSettings> for LockOptions {
    fn from(settings: LockSettings) -> Self {
        Self {
            ttl: Duration::from_millis(settings.ttl_ms),
            auto_renew: settings.auto_renew,
            max_renewals: settings.max_renewals,
            retry_strategy: settings.retry.build(),
            max_retries: settings.max_retries,
            prefix: settings.prefix,
            logger: Arc::new(TracingLogger),
        }
    }
}

//! Lease Locker
//!
//! Mutual exclusion between independent processes, coordinated through a
//! shared key-value store. A lock is a store entry holding a random ownership
//! token under a time-to-live; only the holder of the token can extend or
//! delete it, and a crashed holder's lease simply expires.
//!
//! ```ignore
//! use lease_locker::{InMemoryStore, LockOption, Locker};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let locker = Locker::new(Arc::new(InMemoryStore::new()));
//! let cancel = CancellationToken::new();
//!
//! let lock = locker.obtain(&cancel, "reports", [LockOption::prefix("billing")]).await?;
//! // exclusive section
//! lock.release().await?;
//! ```

pub mod builder;
pub mod error;
pub mod lock;
pub mod locker;
pub mod logger;
pub mod metrics;
pub mod options;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod retry;
pub mod store;

pub use builder::LockerBuilder;
pub use error::{LockError, Result, StoreError};
pub use lock::Lock;
pub use locker::Locker;
pub use logger::{LockLogger, TracingLogger};
pub use metrics::LockMetrics;
pub use options::{default_options, set_default_options, LockOption, LockOptions, LockSettings};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use retry::{ExponentialBackoff, LinearBackoff, NoRetry, RetryStrategy};
pub use store::{DeleteOutcome, InMemoryStore, LeaseStore};

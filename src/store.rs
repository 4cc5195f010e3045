//! Lease Store Protocol
//!
//! The three atomic operations a shared key-value store must offer for the
//! locker to work across processes, and an in-process implementation.

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a compare-and-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The value matched and the key was removed.
    Deleted,
    /// The key exists with a different value.
    Mismatched,
    /// The key does not exist (never set, deleted, or expired).
    Absent,
}

/// Abstract interface to the shared key-value store.
///
/// Every operation must be atomic as observed by all clients of the store.
/// Cross-process mutual exclusion rests entirely on these guarantees.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Sets `key` to `value` with the given expiry unless the key exists.
    ///
    /// Returns `true` if the value was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Resets the expiry of `key` to `ttl` if its value equals `expected`.
    ///
    /// Returns `true` if the expiry was updated.
    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Deletes `key` if its value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`LeaseStore`] for a single process and for tests.
///
/// Expiry is evaluated lazily against [`tokio::time::Instant`], so tests
/// running on paused time observe leases lapsing as the clock advances.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally writes `key`, replacing any holder.
    pub fn put(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Returns the live value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the remaining lifetime of `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }

    /// Number of live entries. Lapsed entries are dropped on the way.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries, Instant::now());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
    entries.retain(|_, entry| entry.is_live(now));
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        purge_expired(&mut entries, now);

        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
            return Ok(false);
        }

        match entries.get_mut(key) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let outcome = match entries.get(key) {
            Some(entry) if !entry.is_live(now) => DeleteOutcome::Absent,
            Some(entry) if entry.value == expected => DeleteOutcome::Deleted,
            Some(_) => DeleteOutcome::Mismatched,
            None => DeleteOutcome::Absent,
        };

        match outcome {
            DeleteOutcome::Deleted | DeleteOutcome::Absent => {
                entries.remove(key);
            }
            DeleteOutcome::Mismatched => {}
        }
        Ok(outcome)
    }
}

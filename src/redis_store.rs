//! Redis Lease Store
//!
//! Claims with `SET NX PX`; extends and deletes through Lua scripts so the
//! token comparison and the write happen atomically on the server.

use crate::error::StoreError;
use crate::store::{DeleteOutcome, LeaseStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
end
return 0
"#;

const DELETE_SCRIPT: &str = r#"
local current = redis.call("get", KEYS[1])
if current == false then
    return -1
end
if current == ARGV[1] then
    return redis.call("del", KEYS[1])
end
return 0
"#;

/// [`LeaseStore`] backed by a single Redis server.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    extend: Script,
    delete: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to the server at `url` (e.g. `redis://127.0.0.1/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        tracing::info!("Connected Redis lease store");

        Ok(Self::with_connection(connection))
    }

    /// Wraps an existing connection manager.
    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            extend: Script::new(EXTEND_SCRIPT),
            delete: Script::new(DELETE_SCRIPT),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LeaseStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut connection)
            .await?;

        Ok(reply.is_some())
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let status: i64 = self
            .extend
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await?;

        Ok(status == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome, StoreError> {
        let mut connection = self.connection.clone();
        let status: i64 = self
            .delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut connection)
            .await?;

        match status {
            1 => Ok(DeleteOutcome::Deleted),
            0 => Ok(DeleteOutcome::Mismatched),
            -1 => Ok(DeleteOutcome::Absent),
            other => Err(StoreError::Protocol(format!(
                "unexpected compare-and-delete reply {other}"
            ))),
        }
    }
}

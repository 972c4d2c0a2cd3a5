//! Redis storage backend for the cache tier.
//!
//! Records are stored as plain STRING values written with `SET .. EX`, so
//! every write resets the key's TTL. Key enumeration uses cursor-based
//! `SCAN MATCH` rather than `KEYS` to avoid blocking the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, cmd};

use super::traits::{CacheStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

/// SCAN page size hint
const SCAN_COUNT: usize = 500;

fn unavailable(e: RedisError) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "bot:" → "bot:user:42")
    prefix: String,
}

impl RedisStore {
    /// Create a new Redis store without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a new Redis store with an optional key prefix.
    ///
    /// The prefix is prepended to all keys, enabling namespacing when
    /// sharing a Redis instance with other applications.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use record_sync::storage::redis::RedisStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be prefixed: "bot:user:42", "bot:quiz:2026-10-18"
    /// let store = RedisStore::with_prefix("redis://localhost", Some("bot:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(unavailable)?;

        // Use startup config: fast-fail, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(unavailable)?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Round-trip PING, used as a health check.
    pub async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        let data: Option<Vec<u8>> = retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move { conn.get(&key).await }
        })
        .await
        .map_err(unavailable)?;

        data.ok_or(StorageError::NotFound)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);
        // Redis rejects EX 0
        let ttl_secs = ttl.as_secs().max(1);

        retry("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move { conn.set_ex::<_, _, ()>(&key, value, ttl_secs).await }
        })
        .await
        .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move { conn.del::<_, ()>(&key).await }
        })
        .await
        .map_err(unavailable)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", self.prefixed_key(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            keys.extend(batch.iter().map(|k| self.strip_prefix(k).to_string()));

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
        let mut conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        // Not retried: INCRBY is not idempotent
        conn.incr(&prefixed, delta)
            .await
            .map_err(|e: RedisError| {
                if e.kind() == redis::ErrorKind::TypeError || e.code() == Some("ERR") {
                    StorageError::Decode(e.to_string())
                } else {
                    unavailable(e)
                }
            })
    }
}

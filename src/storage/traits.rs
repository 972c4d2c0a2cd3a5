use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::record::{QuizRecord, UserField, UserFlag, UserRecord, UserStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Expected outcome of a lookup; drives fallback, never surfaced to end callers.
    #[error("Item not found")]
    NotFound,
    /// Transient backend failure. Retryable, never destroys state.
    #[error("Storage tier unavailable: {0}")]
    Unavailable(String),
    /// Stored bytes could not be decoded. Treated like `NotFound` on reads.
    #[error("Failed to decode stored record: {0}")]
    Decode(String),
    /// Concurrent create lost a unique-constraint race.
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

impl StorageError {
    /// Only tier outages are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Misses and undecodable entries both mean "the tier can't answer".
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NotFound | Self::Decode(_))
    }
}

/// Raw expiring key/value backend for the cache tier.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch raw bytes. A missing or expired key is `Err(NotFound)`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    /// Write bytes with a TTL, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Snapshot of live keys starting with `prefix`, in no particular order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
    /// Atomically add `delta` to an integer key (created at zero, no expiry).
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError>;

    /// Release the underlying client. Default is a no-op.
    async fn close(&self) {}
}

/// Raw relational backend for the durable tier.
///
/// Soft-deleted rows are invisible to every read, list and counter.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StorageError>;
    /// Plain insert. A row with the same id yields `Err(Constraint)`.
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StorageError>;
    /// Upsert by id.
    async fn save_user(&self, user: &UserRecord) -> Result<(), StorageError>;
    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError>;
    /// Returns the number of affected rows; zero means the id is unknown.
    async fn update_user_field(&self, id: i64, field: &UserField) -> Result<u64, StorageError>;
    /// Clear the winner flag on every row. Returns affected rows.
    async fn clear_winner_flags(&self) -> Result<u64, StorageError>;
    /// Mark a row deleted. Returns affected rows.
    async fn soft_delete_user(&self, id: i64) -> Result<u64, StorageError>;

    async fn count_users(&self) -> Result<u64, StorageError>;
    async fn count_users_by_status(&self, status: UserStatus) -> Result<u64, StorageError>;
    async fn count_users_by_flag(&self, flag: UserFlag) -> Result<u64, StorageError>;

    async fn get_quiz(&self, date: NaiveDate) -> Result<Option<QuizRecord>, StorageError>;
    /// Upsert by date.
    async fn save_quiz(&self, quiz: &QuizRecord) -> Result<(), StorageError>;

    /// Release the underlying pool. Default is a no-op.
    async fn close(&self) {}
}

//! Typed access to the expiring cache tier.
//!
//! Keys are type-prefixed strings built from the record identity
//! (`user:42`, `quiz:2026-10-18`). Every write carries the same TTL,
//! so a record that keeps being written never expires while a cold one
//! ages out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use super::UserTier;
use crate::metrics::{self, LatencyTimer};
use crate::record::{QuizRecord, TierCounts, UserField, UserRecord};
use crate::storage::traits::{CacheStore, StorageError};

pub const USER_PREFIX: &str = "user:";
pub const QUIZ_PREFIX: &str = "quiz:";
/// Best-effort counter of propagation tasks that ended in error
pub const PROPAGATION_FAILURES_KEY: &str = "counter:propagation_failures";

const TIER: &str = "cache";

fn outcome<T>(result: &Result<T, StorageError>) -> &'static str {
    match result {
        Ok(_) => "hit",
        Err(StorageError::NotFound) => "miss",
        Err(StorageError::Decode(_)) => "corrupt",
        Err(_) => "error",
    }
}

#[derive(Clone)]
pub struct CacheTier {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl CacheTier {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    #[must_use]
    pub fn user_key(id: i64) -> String {
        format!("{}{}", USER_PREFIX, id)
    }

    #[must_use]
    pub fn quiz_key(date: NaiveDate) -> String {
        format!("{}{}", QUIZ_PREFIX, date)
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Fetch and decode a user. Undecodable or mismatched entries are `Decode`.
    pub async fn load_user(&self, id: i64) -> Result<UserRecord, StorageError> {
        let _timer = LatencyTimer::new(TIER, "get_user");
        let result = async {
            let bytes = self.store.get(&Self::user_key(id)).await?;
            let user = UserRecord::from_bytes(&bytes)?;
            if user.id != id {
                return Err(StorageError::Decode(format!(
                    "entry for user {} holds user {}",
                    id, user.id
                )));
            }
            Ok(user)
        }
        .await;
        metrics::record_operation(TIER, "get_user", outcome(&result));
        result
    }

    /// Write a user with a fresh TTL.
    pub async fn store_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new(TIER, "set_user");
        let bytes = user.to_bytes()?;
        let result = self.store.set(&Self::user_key(user.id), &bytes, self.ttl).await;
        metrics::record_operation(TIER, "set_user", if result.is_ok() { "success" } else { "error" });
        result
    }

    pub async fn evict_user(&self, id: i64) -> Result<(), StorageError> {
        self.store.delete(&Self::user_key(id)).await
    }

    /// Ids of every cached user, parsed from the key snapshot.
    pub async fn user_ids(&self) -> Result<Vec<i64>, StorageError> {
        let keys = self.store.scan_prefix(USER_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let id = key.strip_prefix(USER_PREFIX)?.parse::<i64>().ok();
                if id.is_none() {
                    debug!(key = %key, "Skipping cache key without numeric id");
                }
                id
            })
            .collect())
    }

    pub async fn load_quiz(&self, date: NaiveDate) -> Result<QuizRecord, StorageError> {
        let _timer = LatencyTimer::new(TIER, "get_quiz");
        let result = async {
            let bytes = self.store.get(&Self::quiz_key(date)).await?;
            let quiz = QuizRecord::from_bytes(&bytes)?;
            if quiz.date != date {
                return Err(StorageError::Decode(format!(
                    "entry for quiz {} holds quiz {}",
                    date, quiz.date
                )));
            }
            Ok(quiz)
        }
        .await;
        metrics::record_operation(TIER, "get_quiz", outcome(&result));
        result
    }

    pub async fn store_quiz(&self, quiz: &QuizRecord) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new(TIER, "set_quiz");
        let bytes = quiz.to_bytes()?;
        let result = self.store.set(&Self::quiz_key(quiz.date), &bytes, self.ttl).await;
        metrics::record_operation(TIER, "set_quiz", if result.is_ok() { "success" } else { "error" });
        result
    }

    pub async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
        self.store.increment(key, delta).await
    }

    /// Current value of an integer counter key (zero if absent).
    pub async fn counter(&self, key: &str) -> Result<i64, StorageError> {
        self.increment(key, 0).await
    }
}

#[async_trait]
impl UserTier for CacheTier {
    fn tier_name(&self) -> &'static str {
        TIER
    }

    async fn get_user(&self, id: i64) -> Result<UserRecord, StorageError> {
        self.load_user(id).await
    }

    async fn save_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        self.store_user(user).await
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let mut users = Vec::new();
        for id in self.user_ids().await? {
            match self.load_user(id).await {
                Ok(user) => users.push(user),
                // Expired since the scan, or corrupt: not part of the projection
                Err(e) if e.is_miss() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(users)
    }

    async fn update_user_field(&self, id: i64, field: &UserField) -> Result<u64, StorageError> {
        let mut user = match self.load_user(id).await {
            Ok(user) => user,
            Err(e) if e.is_miss() => return Ok(0),
            Err(e) => return Err(e),
        };
        user.apply(field);
        // Rewrites the whole entry, so bulk jobs refresh every touched TTL
        self.store_user(&user).await?;
        Ok(1)
    }

    async fn counts(&self) -> Result<TierCounts, StorageError> {
        let users = self.list_users().await?;
        Ok(TierCounts::tally(&users))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UserStatus;
    use crate::storage::memory::InMemoryCache;

    fn tier() -> (CacheTier, Arc<InMemoryCache>) {
        let store = Arc::new(InMemoryCache::new());
        (CacheTier::new(store.clone(), Duration::from_secs(60)), store)
    }

    #[test]
    fn test_keys() {
        assert_eq!(CacheTier::user_key(42), "user:42");
        assert_eq!(
            CacheTier::quiz_key(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()),
            "quiz:2026-10-18"
        );
    }

    #[tokio::test]
    async fn test_user_roundtrip_sets_ttl() {
        let (tier, store) = tier();
        let user = UserRecord::new(5, false);
        tier.store_user(&user).await.unwrap();

        assert_eq!(tier.load_user(5).await.unwrap(), user);
        assert!(store.ttl("user:5").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_decode_error() {
        let (tier, store) = tier();
        store.set("user:5", b"{broken", Duration::from_secs(60)).await.unwrap();
        assert!(matches!(tier.load_user(5).await, Err(StorageError::Decode(_))));

        // Entry under the wrong key
        let other = UserRecord::new(6, false).to_bytes().unwrap();
        store.set("user:7", &other, Duration::from_secs(60)).await.unwrap();
        assert!(matches!(tier.load_user(7).await, Err(StorageError::Decode(_))));
    }

    #[tokio::test]
    async fn test_user_ids_skip_foreign_keys() {
        let (tier, store) = tier();
        tier.store_user(&UserRecord::new(1, false)).await.unwrap();
        tier.store_user(&UserRecord::new(2, false)).await.unwrap();
        store.set("user:abc", b"x", Duration::from_secs(60)).await.unwrap();

        let mut ids = tier.user_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_entries() {
        let (tier, store) = tier();
        tier.store_user(&UserRecord::new(1, false)).await.unwrap();
        store.set("user:2", b"garbage", Duration::from_secs(60)).await.unwrap();

        let users = tier.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, 1);
    }

    #[tokio::test]
    async fn test_update_field() {
        let (tier, _) = tier();
        tier.store_user(&UserRecord::new(1, false)).await.unwrap();

        assert_eq!(tier.update_user_field(1, &UserField::Status(UserStatus::Banned)).await.unwrap(), 1);
        assert_eq!(tier.load_user(1).await.unwrap().status, UserStatus::Banned);
        assert_eq!(tier.update_user_field(2, &UserField::Warns(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_field_refreshes_ttl() {
        let (tier, store) = tier();
        let bytes = UserRecord::new(1, false).to_bytes().unwrap();
        store.set("user:1", &bytes, Duration::from_secs(2)).await.unwrap();

        tier.update_user_field(1, &UserField::IsWinner(false)).await.unwrap();
        assert!(store.ttl("user:1").unwrap() > Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_counts() {
        let (tier, _) = tier();
        let mut admin = UserRecord::new(1, true);
        admin.is_winner = true;
        tier.store_user(&admin).await.unwrap();
        tier.store_user(&UserRecord::new(2, false)).await.unwrap();

        let counts = tier.counts().await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.admins, 1);
        assert_eq!(counts.winners, 1);
        assert_eq!(counts.active, 2);
    }

    #[tokio::test]
    async fn test_counter() {
        let (tier, _) = tier();
        assert_eq!(tier.counter(PROPAGATION_FAILURES_KEY).await.unwrap(), 0);
        tier.increment(PROPAGATION_FAILURES_KEY, 1).await.unwrap();
        assert_eq!(tier.counter(PROPAGATION_FAILURES_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_quiz_roundtrip() {
        let (tier, _) = tier();
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let quiz = QuizRecord::new(date, "q", "a", chrono::NaiveTime::MIN);
        tier.store_quiz(&quiz).await.unwrap();
        assert_eq!(tier.load_quiz(date).await.unwrap(), quiz);
        assert_eq!(
            tier.load_quiz(date.succ_opt().unwrap()).await.unwrap_err(),
            StorageError::NotFound
        );
    }
}

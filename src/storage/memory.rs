//! In-process backends for both tiers.
//!
//! Used by tests and by embedders that don't need a shared cache or a
//! real database. Expiry is checked lazily on access.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::record::{QuizRecord, UserField, UserFlag, UserRecord, UserStatus};
use super::traits::{CacheStore, DurableStore, StorageError};

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

pub struct InMemoryCache {
    data: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of live (unexpired) keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.iter().filter(|e| !e.value().is_expired()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a key as if its TTL had elapsed.
    pub fn expire(&self, key: &str) {
        self.data.remove(key);
    }

    /// Remaining TTL of a key, if it has one.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.data
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired() {
                return Ok(entry.value.clone());
            }
        }
        self.data.remove_if(key, |_, e| e.is_expired());
        Err(StorageError::NotFound)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        self.data.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired())
            .map(|e| e.key().clone())
            .collect())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| CacheEntry {
            value: b"0".to_vec(),
            expires_at: None,
        });
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StorageError::Decode(format!("'{}' is not an integer", key)))?;
        let next = current.saturating_add(delta);
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }
}

struct DurableRow {
    user: UserRecord,
    deleted: bool,
}

pub struct InMemoryDurable {
    users: DashMap<i64, DurableRow>,
    quizzes: DashMap<NaiveDate, QuizRecord>,
}

impl InMemoryDurable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            quizzes: DashMap::new(),
        }
    }

    /// Live (not soft-deleted) user rows
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.iter().filter(|r| !r.deleted).count()
    }

    #[must_use]
    pub fn quiz_count(&self) -> usize {
        self.quizzes.len()
    }

    fn live_users(&self) -> impl Iterator<Item = UserRecord> + '_ {
        self.users
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| r.user.clone())
    }
}

impl Default for InMemoryDurable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurable {
    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StorageError> {
        Ok(self
            .users
            .get(&id)
            .filter(|r| !r.deleted)
            .map(|r| r.user.clone()))
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        match self.users.entry(user.id) {
            Entry::Occupied(_) => Err(StorageError::Constraint(format!(
                "duplicate user id {}",
                user.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(DurableRow { user: user.clone(), deleted: false });
                Ok(())
            }
        }
    }

    async fn save_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        self.users.insert(user.id, DurableRow { user: user.clone(), deleted: false });
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        Ok(self.live_users().collect())
    }

    async fn update_user_field(&self, id: i64, field: &UserField) -> Result<u64, StorageError> {
        match self.users.get_mut(&id) {
            Some(mut row) if !row.deleted => {
                row.user.apply(field);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn clear_winner_flags(&self) -> Result<u64, StorageError> {
        let mut affected = 0;
        for mut row in self.users.iter_mut() {
            if !row.deleted && row.user.is_winner {
                row.user.is_winner = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn soft_delete_user(&self, id: i64) -> Result<u64, StorageError> {
        match self.users.get_mut(&id) {
            Some(mut row) if !row.deleted => {
                row.deleted = true;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn count_users(&self) -> Result<u64, StorageError> {
        Ok(self.live_users().count() as u64)
    }

    async fn count_users_by_status(&self, status: UserStatus) -> Result<u64, StorageError> {
        Ok(self.live_users().filter(|u| u.status == status).count() as u64)
    }

    async fn count_users_by_flag(&self, flag: UserFlag) -> Result<u64, StorageError> {
        Ok(self.live_users().filter(|u| flag.is_set(u)).count() as u64)
    }

    async fn get_quiz(&self, date: NaiveDate) -> Result<Option<QuizRecord>, StorageError> {
        Ok(self.quizzes.get(&date).map(|q| q.value().clone()))
    }

    async fn save_quiz(&self, quiz: &QuizRecord) -> Result<(), StorageError> {
        self.quizzes.insert(quiz.date, quiz.clone());
        Ok(())
    }
}

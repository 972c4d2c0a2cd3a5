//! Typed access to the durable tier.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use super::UserTier;
use crate::admin::AdminProvider;
use crate::metrics::{self, LatencyTimer};
use crate::record::{QuizRecord, TierCounts, UserField, UserFlag, UserRecord, UserStatus};
use crate::storage::traits::{DurableStore, StorageError};

const TIER: &str = "durable";

fn status_label<T>(result: &Result<T, StorageError>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}

#[derive(Clone)]
pub struct DurableTier {
    store: Arc<dyn DurableStore>,
    admins: Arc<dyn AdminProvider>,
}

impl DurableTier {
    pub fn new(store: Arc<dyn DurableStore>, admins: Arc<dyn AdminProvider>) -> Self {
        Self { store, admins }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Read a user, creating a default row on first access.
    ///
    /// The admin flag of a new row comes from the allow-list. When two
    /// callers race to create the same id, the loser's insert hits the
    /// unique constraint and it re-reads the winner's row instead.
    pub async fn get_or_create_user(&self, id: i64) -> Result<UserRecord, StorageError> {
        let _timer = LatencyTimer::new(TIER, "get_or_create_user");

        if let Some(user) = self.store.get_user(id).await? {
            metrics::record_operation(TIER, "get_or_create_user", "hit");
            return Ok(user);
        }

        let fresh = UserRecord::new(id, self.admins.is_admin(id));
        match self.store.insert_user(&fresh).await {
            Ok(()) => {
                info!(user_id = id, is_admin = fresh.is_admin, "Created durable user record");
                metrics::record_operation(TIER, "get_or_create_user", "created");
                Ok(fresh)
            }
            Err(StorageError::Constraint(reason)) => {
                debug!(user_id = id, reason = %reason, "Lost create race, reading winner's row");
                metrics::record_operation(TIER, "get_or_create_user", "raced");
                self.store.get_user(id).await?.ok_or(StorageError::NotFound)
            }
            Err(e) => {
                metrics::record_operation(TIER, "get_or_create_user", "error");
                Err(e)
            }
        }
    }

    pub async fn get_quiz(&self, date: NaiveDate) -> Result<Option<QuizRecord>, StorageError> {
        let _timer = LatencyTimer::new(TIER, "get_quiz");
        self.store.get_quiz(date).await
    }

    pub async fn save_quiz(&self, quiz: &QuizRecord) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new(TIER, "save_quiz");
        let result = self.store.save_quiz(quiz).await;
        metrics::record_operation(TIER, "save_quiz", status_label(&result));
        result
    }

    pub async fn clear_winner_flags(&self) -> Result<u64, StorageError> {
        self.store.clear_winner_flags().await
    }

    pub async fn soft_delete_user(&self, id: i64) -> Result<u64, StorageError> {
        self.store.soft_delete_user(id).await
    }
}

#[async_trait]
impl UserTier for DurableTier {
    fn tier_name(&self) -> &'static str {
        TIER
    }

    async fn get_user(&self, id: i64) -> Result<UserRecord, StorageError> {
        let _timer = LatencyTimer::new(TIER, "get_user");
        self.store.get_user(id).await?.ok_or(StorageError::NotFound)
    }

    async fn save_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new(TIER, "save_user");
        let result = self.store.save_user(user).await;
        metrics::record_operation(TIER, "save_user", status_label(&result));
        result
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        self.store.list_users().await
    }

    async fn update_user_field(&self, id: i64, field: &UserField) -> Result<u64, StorageError> {
        let result = self.store.update_user_field(id, field).await;
        metrics::record_operation(TIER, "update_field", status_label(&result));
        result
    }

    async fn counts(&self) -> Result<TierCounts, StorageError> {
        let mut counts = TierCounts {
            total: self.store.count_users().await?,
            admins: self.store.count_users_by_flag(UserFlag::Admin).await?,
            winners: self.store.count_users_by_flag(UserFlag::Winner).await?,
            ..TierCounts::default()
        };
        for status in UserStatus::ALL {
            *counts.status_mut(status) = self.store.count_users_by_status(status).await?;
        }
        Ok(counts)
    }
}

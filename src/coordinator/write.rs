//! Write path: synchronous cache write, asynchronous durable propagation.
//!
//! Every user mutation is a read-modify-save through [`SyncCoordinator::save_user`],
//! so the caller's next read sees its own write even while the durable
//! tier lags behind. Quizzes are low-volume and keyed by calendar day;
//! they are written to the durable tier first and cached after.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::propagation::{isolated, propagate, report};
use super::{SyncCoordinator, SyncFailure, SyncOutcome};
use crate::record::{QuizRecord, UserRecord, UserStatus};
use crate::resilience::retry::{retry_when, RetryConfig};
use crate::storage::traits::StorageError;

impl SyncCoordinator {
    /// Write a user to the cache tier and queue its propagation.
    ///
    /// The returned error reflects only the cache write. Propagation is
    /// queued either way and reads whatever the cache tier holds when
    /// it runs.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn save_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let result = self.cache.store_user(user).await;
        if let Err(e) = &result {
            warn!(error = %e, "Cache write failed");
        }
        self.spawn_propagation(user.id);
        result
    }

    /// Write a user to the cache tier and propagate it inline with retries.
    ///
    /// Attempt N waits N × `sync_retry_delay_ms` before retrying. Returns
    /// [`SyncOutcome::SourceGone`] without error if the cache entry
    /// disappears between attempts. Each attempt runs behind the same
    /// panic boundary as background propagation; a panic ends the retries
    /// with [`SyncFailure::Panicked`].
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn save_user_with_retry(&self, user: &UserRecord) -> Result<SyncOutcome, SyncFailure> {
        self.cache.store_user(user).await?;

        let policy = RetryConfig::linear(self.config.sync_retry_attempts, self.config.sync_retry_delay());
        let result = retry_when(
            "save_user_with_retry",
            &policy,
            SyncFailure::is_retryable,
            || isolated(propagate(&self.cache, &self.durable, user.id)),
        )
        .await;

        if result == Ok(SyncOutcome::SourceGone) {
            debug!(user_id = user.id, "Source disappeared, abandoning retries");
        }
        report(&self.cache, user.id, &result).await;
        result
    }

    /// Read-modify-save a user.
    async fn modify_user<F>(&self, id: i64, change: F) -> Result<UserRecord, StorageError>
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut user = self.get_user(id).await;
        change(&mut user);
        self.save_user(&user).await?;
        Ok(user)
    }

    /// Add `delta` warnings (negative to forgive), clamped at zero.
    ///
    /// Returns the new warning count.
    pub async fn update_warnings(&self, id: i64, delta: i64) -> Result<u32, StorageError> {
        let user = self.modify_user(id, |u| u.apply_warning_delta(delta)).await?;
        debug!(user_id = id, delta, warns = user.warns, "Warnings updated");
        Ok(user.warns)
    }

    pub async fn set_winner_flag(&self, id: i64, is_winner: bool) -> Result<(), StorageError> {
        self.modify_user(id, |u| u.is_winner = is_winner).await?;
        Ok(())
    }

    /// Change moderation status.
    ///
    /// `mute_until` is kept for muted and restricted users and cleared
    /// otherwise.
    pub async fn set_status(
        &self,
        id: i64,
        status: UserStatus,
        mute_until: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.modify_user(id, |u| {
            u.status = status;
            u.mute_until = match status {
                UserStatus::Muted | UserStatus::Restricted => mute_until,
                UserStatus::Active | UserStatus::Banned => None,
            };
        })
        .await?;
        info!(user_id = id, status = %status, "User status changed");
        Ok(())
    }

    pub async fn set_admin_title(&self, id: i64, title: impl Into<String>) -> Result<(), StorageError> {
        let title = title.into();
        self.modify_user(id, |u| u.admin_title = title).await?;
        Ok(())
    }

    pub async fn set_birthday(&self, id: i64, birthday: Option<NaiveDate>) -> Result<(), StorageError> {
        self.modify_user(id, |u| u.birthday = birthday).await?;
        Ok(())
    }

    /// Count one message from the user. Returns the new total.
    pub async fn record_message(&self, id: i64) -> Result<u64, StorageError> {
        let user = self
            .modify_user(id, |u| u.message_count = u.message_count.saturating_add(1))
            .await?;
        Ok(user.message_count)
    }

    /// Soft-delete a user in the durable tier and drop it from the cache tier.
    ///
    /// Returns whether a live durable row was marked. The cache eviction
    /// is best-effort.
    #[tracing::instrument(skip(self))]
    pub async fn forget_user(&self, id: i64) -> Result<bool, StorageError> {
        // Evict first so queued propagation finds no source
        if let Err(e) = self.cache.evict_user(id).await {
            warn!(error = %e, "Cache eviction failed");
        }
        let affected = self.durable.soft_delete_user(id).await?;
        info!(affected, "User forgotten");
        Ok(affected > 0)
    }

    /// Upsert a day's quiz: durable tier first, then cache.
    #[tracing::instrument(skip(self, quiz), fields(date = %quiz.date))]
    pub async fn save_quiz(&self, quiz: &QuizRecord) -> Result<(), StorageError> {
        self.durable.save_quiz(quiz).await?;
        if let Err(e) = self.cache.store_quiz(quiz).await {
            warn!(error = %e, "Quiz cache write failed");
        }
        Ok(())
    }

    /// Force-complete today's quiz (civil timezone).
    ///
    /// Returns `true` if an active quiz was completed; `false` if there
    /// is no quiz today or it was already inactive.
    pub async fn mark_quiz_completed_today(&self) -> Result<bool, StorageError> {
        let today = self.config.civil_today();
        let Some(mut quiz) = self.get_quiz(today).await? else {
            debug!(date = %today, "No quiz today");
            return Ok(false);
        };
        if !quiz.complete() {
            return Ok(false);
        }
        self.save_quiz(&quiz).await?;
        info!(date = %today, "Quiz completed");
        Ok(true)
    }

    /// Record the first correct answer for a day's quiz.
    ///
    /// Completes the quiz and raises the user's winner flag. Returns
    /// `false` if the quiz is missing or already has a winner.
    pub async fn record_quiz_winner(&self, date: NaiveDate, user_id: i64) -> Result<bool, StorageError> {
        let Some(mut quiz) = self.get_quiz(date).await? else {
            return Ok(false);
        };
        if !quiz.record_winner(user_id) {
            return Ok(false);
        }
        self.save_quiz(&quiz).await?;
        self.set_winner_flag(user_id, true).await?;
        info!(date = %date, user_id, "Quiz winner recorded");
        Ok(true)
    }
}

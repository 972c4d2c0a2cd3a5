//! Read path: cache first, fallback resolution on miss.

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::SyncCoordinator;
use crate::fallback::{FallbackReason, Resolution, ResolvedFrom};
use crate::record::{QuizRecord, UserField, UserRecord};
use crate::storage::traits::StorageError;

impl SyncCoordinator {
    /// Read a user. Always produces a record.
    ///
    /// A cache hit has its admin flag re-derived from the allow-list; a
    /// flipped flag is written back to both tiers. Misses and corrupt
    /// entries go through the fallback resolver and the result is
    /// backfilled into the cache tier. If the cache tier is down the
    /// resolver is used without backfill.
    #[tracing::instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> UserRecord {
        let reason = match self.cache.load_user(id).await {
            Ok(mut user) => {
                if user.reconcile_admin(self.admins.is_admin(id)) {
                    info!(user_id = id, is_admin = user.is_admin, "Correcting stale admin flag");
                    self.heal_admin_flag(&user, true).await;
                }
                return user;
            }
            Err(StorageError::NotFound) => FallbackReason::Miss,
            Err(StorageError::Decode(e)) => {
                warn!(user_id = id, error = %e, "Corrupt cache entry, treating as miss");
                FallbackReason::Corrupt
            }
            Err(e) => {
                warn!(user_id = id, error = %e, "Cache tier unavailable, reading through");
                FallbackReason::Unavailable
            }
        };

        let Resolution { mut record, source } = self.resolver.resolve(id, reason).await;
        let corrected = record.reconcile_admin(self.admins.is_admin(id));

        if corrected && source == ResolvedFrom::Durable {
            info!(user_id = id, is_admin = record.is_admin, "Correcting stale admin flag");
            self.heal_admin_flag(&record, reason.allows_backfill()).await;
        } else if reason.allows_backfill() {
            self.backfill(&record).await;
        }
        record
    }

    /// Persist a re-derived admin flag to both tiers.
    ///
    /// With a cache write the propagation task carries the fix to the
    /// durable tier; otherwise only the durable column is corrected.
    async fn heal_admin_flag(&self, user: &UserRecord, write_cache: bool) {
        let cached = write_cache
            && match self.cache.store_user(user).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(user_id = user.id, error = %e, "Could not rewrite corrected user to cache");
                    false
                }
            };

        if cached {
            self.spawn_propagation(user.id);
        } else {
            self.spawn_field_correction(user.id, UserField::IsAdmin(user.is_admin));
        }
    }

    async fn backfill(&self, user: &UserRecord) {
        match self.cache.store_user(user).await {
            Ok(()) => debug!(user_id = user.id, "Backfilled cache tier"),
            Err(e) => warn!(user_id = user.id, error = %e, "Cache backfill failed"),
        }
    }

    /// Read the quiz for a calendar day.
    ///
    /// `Ok(None)` means no quiz is scheduled for that day. Only a
    /// durable-tier failure is an error.
    #[tracing::instrument(skip(self))]
    pub async fn get_quiz(&self, date: NaiveDate) -> Result<Option<QuizRecord>, StorageError> {
        let backfill = match self.cache.load_quiz(date).await {
            Ok(quiz) => return Ok(Some(quiz)),
            Err(e) if e.is_miss() => true,
            Err(e) => {
                warn!(date = %date, error = %e, "Cache tier unavailable, reading quiz through");
                false
            }
        };

        let quiz = self.durable.get_quiz(date).await?;
        if let Some(quiz) = quiz.as_ref().filter(|_| backfill) {
            if let Err(e) = self.cache.store_quiz(quiz).await {
                warn!(date = %date, error = %e, "Quiz backfill failed");
            }
        }
        Ok(quiz)
    }

    /// Today's quiz in the civil timezone.
    pub async fn get_quiz_today(&self) -> Result<Option<QuizRecord>, StorageError> {
        self.get_quiz(self.config.civil_today()).await
    }
}

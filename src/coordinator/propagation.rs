//! Cache → durable propagation with a per-task error boundary.
//!
//! A propagation task replicates whatever the cache tier holds for an id
//! *when the task runs*, not the value captured when it was queued, so
//! racing saves collapse onto the latest write. A task never writes to
//! the durable tier from nothing: if the cache entry is gone the task
//! ends with [`SyncOutcome::SourceGone`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error};

use super::{SyncCoordinator, SyncFailure, SyncOutcome};
use crate::metrics;
use crate::record::UserField;
use crate::storage::traits::StorageError;
use crate::tier::cache::PROPAGATION_FAILURES_KEY;
use crate::tier::{CacheTier, DurableTier, UserTier};

/// Copy the cache tier's current value for `id` to the durable tier.
pub(super) async fn propagate(
    cache: &CacheTier,
    durable: &DurableTier,
    id: i64,
) -> Result<SyncOutcome, StorageError> {
    match cache.load_user(id).await {
        Ok(user) => {
            durable.save_user(&user).await?;
            Ok(SyncOutcome::Synced)
        }
        Err(e) if e.is_miss() => {
            debug!(user_id = id, reason = %e, "Cache no longer holds user, nothing to propagate");
            Ok(SyncOutcome::SourceGone)
        }
        Err(e) => Err(e),
    }
}

/// Set one field directly on the durable row.
pub(super) async fn correct_field(
    durable: &DurableTier,
    id: i64,
    field: UserField,
) -> Result<SyncOutcome, StorageError> {
    match durable.update_user_field(id, &field).await? {
        0 => {
            debug!(user_id = id, column = field.column(), "No durable row to correct");
            Ok(SyncOutcome::SourceGone)
        }
        _ => Ok(SyncOutcome::Synced),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Await a propagation future, turning a panic into [`SyncFailure::Panicked`].
pub(super) async fn isolated<F>(task: F) -> Result<SyncOutcome, SyncFailure>
where
    F: Future<Output = Result<SyncOutcome, StorageError>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(SyncFailure::Storage(e)),
        Err(payload) => Err(SyncFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Log, count and record a propagation result.
///
/// Failures are logged with the id, counted in metrics and bumped on the
/// cache tier's failure counter (best-effort).
pub(super) async fn report(cache: &CacheTier, id: i64, result: &Result<SyncOutcome, SyncFailure>) {
    match result {
        Ok(outcome) => {
            debug!(user_id = id, outcome = %outcome, "Propagation finished");
            metrics::record_propagation(outcome.as_str());
        }
        Err(failure) => {
            error!(user_id = id, error = %failure, "Propagation to durable tier failed");
            metrics::record_propagation(match failure {
                SyncFailure::Storage(_) => "error",
                SyncFailure::Panicked(_) => "panicked",
            });
            if let Err(e) = cache.increment(PROPAGATION_FAILURES_KEY, 1).await {
                debug!(error = %e, "Could not bump propagation failure counter");
            }
        }
    }
}

/// Run a propagation future behind the panic boundary and report it.
pub(super) async fn guarded<F>(cache: &CacheTier, id: i64, task: F) -> Result<SyncOutcome, SyncFailure>
where
    F: Future<Output = Result<SyncOutcome, StorageError>>,
{
    let result = isolated(task).await;
    report(cache, id, &result).await;
    result
}

impl SyncCoordinator {
    /// Spawn a tracked, isolated background task for `id`.
    pub(super) fn spawn_guarded<F>(&self, id: i64, task: F)
    where
        F: Future<Output = Result<SyncOutcome, StorageError>> + Send + 'static,
    {
        let cache = self.cache.clone();
        let tracker = self.tracker.clone();
        self.tracker.spawn(async move {
            let _ = guarded(&cache, id, task).await;
            // This task still counts until it returns
            metrics::set_pending_propagations(tracker.len().saturating_sub(1));
        });
        metrics::set_pending_propagations(self.tracker.len());
    }

    /// Queue replication of `id`'s cache value to the durable tier.
    pub(super) fn spawn_propagation(&self, id: i64) {
        let cache = self.cache.clone();
        let durable = self.durable.clone();
        self.spawn_guarded(id, async move { propagate(&cache, &durable, id).await });
    }

    /// Queue a single-field correction of the durable row.
    pub(super) fn spawn_field_correction(&self, id: i64, field: UserField) {
        let durable = self.durable.clone();
        self.spawn_guarded(id, async move { correct_field(&durable, id, field).await });
    }

    /// Replicate `id` now and wait for the result.
    pub async fn sync_user(&self, id: i64) -> Result<SyncOutcome, SyncFailure> {
        guarded(&self.cache, id, propagate(&self.cache, &self.durable, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::StaticAdmins;
    use crate::record::UserRecord;
    use crate::storage::memory::{InMemoryCache, InMemoryDurable};
    use crate::storage::traits::DurableStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn tiers() -> (CacheTier, DurableTier, Arc<InMemoryDurable>) {
        let durable_store = Arc::new(InMemoryDurable::new());
        let cache = CacheTier::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60));
        let durable = DurableTier::new(durable_store.clone(), Arc::new(StaticAdmins::default()));
        (cache, durable, durable_store)
    }

    #[tokio::test]
    async fn test_propagate_copies_cache_value() {
        let (cache, durable, store) = tiers();
        let mut user = UserRecord::new(1, false);
        user.warns = 2;
        cache.store_user(&user).await.unwrap();

        assert_eq!(propagate(&cache, &durable, 1).await.unwrap(), SyncOutcome::Synced);
        assert_eq!(store.get_user(1).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_propagate_without_source_writes_nothing() {
        let (cache, durable, store) = tiers();
        assert_eq!(propagate(&cache, &durable, 1).await.unwrap(), SyncOutcome::SourceGone);
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn test_guarded_catches_panic_and_counts() {
        let (cache, _, _) = tiers();
        let result = guarded(&cache, 9, async {
            if cache.ttl() > Duration::ZERO {
                panic!("boom");
            }
            Ok(SyncOutcome::Synced)
        })
        .await;

        assert_eq!(result, Err(SyncFailure::Panicked("boom".into())));
        assert_eq!(cache.counter(PROPAGATION_FAILURES_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_guarded_maps_storage_error() {
        let (cache, _, _) = tiers();
        let result = guarded(&cache, 9, async {
            Err(StorageError::Unavailable("down".into()))
        })
        .await;

        assert!(matches!(result, Err(SyncFailure::Storage(StorageError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn test_correct_field_reports_missing_row() {
        let (_, durable, store) = tiers();
        assert_eq!(
            correct_field(&durable, 3, UserField::IsAdmin(true)).await.unwrap(),
            SyncOutcome::SourceGone
        );

        store.insert_user(&UserRecord::new(3, false)).await.unwrap();
        assert_eq!(
            correct_field(&durable, 3, UserField::IsAdmin(true)).await.unwrap(),
            SyncOutcome::Synced
        );
        assert!(store.get_user(3).await.unwrap().unwrap().is_admin);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}

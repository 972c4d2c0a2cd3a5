//! Bulk reconciliation jobs across both tiers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::propagation::{guarded, propagate};
use super::{AdminRefreshReport, ConsistencyReport, ResyncReport, SyncCoordinator};
use crate::metrics;
use crate::record::{TierCounts, UserField};
use crate::storage::traits::StorageError;
use crate::tier::cache::PROPAGATION_FAILURES_KEY;
use crate::tier::UserTier;

/// Re-derive the admin flag of every record in one tier.
async fn refresh_tier(
    tier: &dyn UserTier,
    allow_list: &HashSet<i64>,
) -> Result<AdminRefreshReport, StorageError> {
    let mut report = AdminRefreshReport::default();
    for user in tier.list_users().await? {
        let should_be_admin = allow_list.contains(&user.id);
        if user.is_admin == should_be_admin {
            report.unchanged += 1;
            continue;
        }
        match tier.update_user_field(user.id, &UserField::IsAdmin(should_be_admin)).await {
            Ok(0) => {
                info!(tier = tier.tier_name(), user_id = user.id, "User vanished before admin update");
                report.unchanged += 1;
            }
            Ok(_) => {
                debug!(tier = tier.tier_name(), user_id = user.id, is_admin = should_be_admin, "Admin flag updated");
                report.updated += 1;
            }
            Err(e) => {
                warn!(tier = tier.tier_name(), user_id = user.id, error = %e, "Admin flag update failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

async fn counts_of(tier: &dyn UserTier) -> Option<TierCounts> {
    match tier.counts().await {
        Ok(counts) => {
            info!(
                tier = tier.tier_name(),
                total = counts.total,
                active = counts.active,
                muted = counts.muted,
                restricted = counts.restricted,
                banned = counts.banned,
                admins = counts.admins,
                winners = counts.winners,
                "Tier counts"
            );
            for (measure, value) in [
                ("total", counts.total),
                ("active", counts.active),
                ("muted", counts.muted),
                ("restricted", counts.restricted),
                ("banned", counts.banned),
                ("admins", counts.admins),
                ("winners", counts.winners),
            ] {
                metrics::set_audit_count(tier.tier_name(), measure, value);
            }
            Some(counts)
        }
        Err(e) => {
            warn!(tier = tier.tier_name(), error = %e, "Could not count tier");
            None
        }
    }
}

impl SyncCoordinator {
    /// Push every cached user to the durable tier.
    ///
    /// At most [`resync_worker_slots`](crate::SyncConfig::resync_worker_slots)
    /// propagations run at once. Returns after every task has finished;
    /// failed and panicked tasks are counted, not raised. Only failing
    /// to enumerate the cache tier is an error.
    #[tracing::instrument(skip(self))]
    pub async fn full_resync(&self) -> Result<ResyncReport, StorageError> {
        let started = Instant::now();
        let ids = self.cache.user_ids().await?;
        let slots = self.config.resync_worker_slots();
        info!(total = ids.len(), slots, "Starting full resync");

        let limiter = Arc::new(Semaphore::new(slots));
        let mut join_set = JoinSet::new();

        for id in ids.iter().copied() {
            // The limiter is never closed
            let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
                break;
            };
            let cache = self.cache.clone();
            let durable = self.durable.clone();
            join_set.spawn(async move {
                let _permit = permit;
                guarded(&cache, id, propagate(&cache, &durable, id)).await
            });
        }

        let mut report = ResyncReport { total: ids.len(), ..Default::default() };
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => report.record(&result),
                Err(e) => {
                    error!(error = %e, "Resync task did not complete");
                    report.failed += 1;
                }
            }
        }

        metrics::record_job_results("full_resync", "synced", report.synced);
        metrics::record_job_results("full_resync", "skipped", report.skipped);
        metrics::record_job_results("full_resync", "failed", report.failed);
        metrics::record_job_duration("full_resync", started.elapsed());
        info!(
            total = report.total,
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full resync complete"
        );
        Ok(report)
    }

    /// Re-derive every admin flag in both tiers from the allow-list.
    ///
    /// A cache tier that can't be listed is logged and skipped; a durable
    /// tier that can't be listed is an error (after the cache pass).
    #[tracing::instrument(skip(self))]
    pub async fn refresh_admin_statuses(&self) -> Result<AdminRefreshReport, StorageError> {
        let started = Instant::now();
        let allow_list = self.admins.admin_ids();
        let mut report = AdminRefreshReport::default();

        let durable = refresh_tier(&self.durable, &allow_list).await;
        match refresh_tier(&self.cache, &allow_list).await {
            Ok(cache) => report.merge(&cache),
            Err(e) => warn!(error = %e, "Skipping cache tier in admin refresh"),
        }
        let durable = durable?;
        report.merge(&durable);

        metrics::record_job_results("admin_refresh", "updated", report.updated);
        metrics::record_job_results("admin_refresh", "unchanged", report.unchanged);
        metrics::record_job_results("admin_refresh", "failed", report.failed);
        metrics::record_job_duration("admin_refresh", started.elapsed());
        info!(
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "Admin statuses refreshed"
        );
        Ok(report)
    }

    /// Clear the winner flag everywhere.
    ///
    /// The cache pass is best-effort and runs first; the durable clear is
    /// authoritative and its error is returned. Returns durable rows cleared.
    #[tracing::instrument(skip(self))]
    pub async fn reset_all_winner_flags(&self) -> Result<u64, StorageError> {
        match self.cache.list_users().await {
            Ok(users) => {
                for user in users.iter().filter(|u| u.is_winner) {
                    if let Err(e) = self.cache.update_user_field(user.id, &UserField::IsWinner(false)).await {
                        warn!(user_id = user.id, error = %e, "Could not clear cached winner flag");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not list cache tier to clear winner flags"),
        }

        let cleared = self.durable.clear_winner_flags().await?;
        info!(cleared, "Winner flags reset");
        Ok(cleared)
    }

    /// Log aggregate counts from both tiers side by side.
    ///
    /// Observational only: differences are reported, never repaired.
    pub async fn audit_consistency(&self) -> ConsistencyReport {
        let report = ConsistencyReport {
            cache: counts_of(&self.cache).await,
            durable: counts_of(&self.durable).await,
            propagation_failures: self.cache.counter(PROPAGATION_FAILURES_KEY).await.ok(),
        };

        let divergent = report.divergent_measures();
        for measure in &divergent {
            metrics::record_audit_divergence(measure);
        }
        info!(
            divergent = ?divergent,
            propagation_failures = ?report.propagation_failures,
            pending = self.pending_syncs(),
            "Consistency audit"
        );
        report
    }

    /// Run [`audit_consistency`](Self::audit_consistency) every
    /// `audit_interval_secs` until the handle is aborted.
    pub fn spawn_consistency_audit(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let period = self.config.audit_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                coordinator.audit_consistency().await;
            }
        })
    }
}

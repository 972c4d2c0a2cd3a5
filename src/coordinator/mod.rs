// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The [`SyncCoordinator`] is the repository the rest of the bot talks to.
//! It ties together:
//! - the cache tier (Redis, or in-process) as the latency-critical path
//! - the durable tier (MySQL/SQLite) as the long-term source of truth
//! - the fallback resolver for reads the cache tier can't answer
//! - background propagation of every cache write to the durable tier
//!
//! # Read and write paths
//!
//! ```text
//! get_user:  cache ──hit──▶ record (admin flag re-derived)
//!              │ miss/corrupt            │ unavailable
//!              ▼                         ▼
//!          resolver ──▶ backfill     resolver (no backfill)
//!
//! save_user: cache (sync, error returned) ──▶ spawn propagation
//!                                              reads cache, writes durable
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use record_sync::{SyncConfig, SyncCoordinator, StaticAdmins};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     sql_url: Some("sqlite:bot.db?mode=rwc".into()),
//!     ..Default::default()
//! };
//! let admins = Arc::new(StaticAdmins::from_config(&config));
//! let coordinator = SyncCoordinator::connect(config, admins).await?;
//!
//! let mut user = coordinator.get_user(42).await;
//! user.first_name = "Ada".into();
//! coordinator.save_user(&user).await?;
//!
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod propagation;
mod read;
mod reconcile;
mod types;
mod write;

pub use types::{
    AdminRefreshReport, ConnectError, ConsistencyReport, ResyncReport, SyncFailure, SyncOutcome,
};

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::admin::AdminProvider;
use crate::config::SyncConfig;
use crate::fallback::FallbackResolver;
use crate::metrics;
use crate::storage::memory::InMemoryCache;
use crate::storage::redis::RedisStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{CacheStore, DurableStore, StorageError};
use crate::tier::{CacheTier, DurableTier};

/// Cache-first repository over the two storage tiers.
///
/// # Thread Safety
///
/// The coordinator is `Send + Sync`; share it behind an `Arc`. Per-id
/// state needs no locking because each propagation task only touches
/// its own id.
pub struct SyncCoordinator {
    config: SyncConfig,

    cache: CacheTier,

    durable: DurableTier,

    resolver: FallbackResolver,

    /// Polled on every admin-status check
    admins: Arc<dyn AdminProvider>,

    /// Fire-and-forget propagation tasks
    tracker: TaskTracker,

    /// Serializes close/wait/reopen cycles on the tracker
    barrier: Mutex<()>,
}

impl SyncCoordinator {
    /// Build a coordinator over already-constructed backends.
    pub fn new(
        config: SyncConfig,
        cache_store: Arc<dyn CacheStore>,
        durable_store: Arc<dyn DurableStore>,
        admins: Arc<dyn AdminProvider>,
    ) -> Self {
        let cache = CacheTier::new(cache_store, config.cache_ttl());
        let durable = DurableTier::new(durable_store, admins.clone());
        let resolver = FallbackResolver::new(durable.clone(), admins.clone());

        Self {
            config,
            cache,
            durable,
            resolver,
            admins,
            tracker: TaskTracker::new(),
            barrier: Mutex::new(()),
        }
    }

    /// Open both backends from configuration.
    ///
    /// `sql_url` is required. Without `redis_url` the cache tier runs
    /// in-process, which is fine for a single bot instance.
    #[tracing::instrument(skip(config, admins), fields(has_redis = config.redis_url.is_some()))]
    pub async fn connect(
        config: SyncConfig,
        admins: Arc<dyn AdminProvider>,
    ) -> Result<Self, ConnectError> {
        config.validate()?;

        let sql_url = config
            .sql_url
            .as_deref()
            .ok_or(ConnectError::MissingUrl("sql_url"))?;
        info!("Connecting to durable tier...");
        let sql = async {
            let sql = SqlStore::new(sql_url).await?;
            sql.ping().await?;
            Ok::<_, StorageError>(sql)
        };
        let sql = match sql.await {
            Ok(sql) => sql,
            Err(source) => {
                metrics::set_backend_healthy("sql", false);
                return Err(ConnectError::Backend { tier: "durable", source });
            }
        };
        metrics::set_backend_healthy("sql", true);
        let durable_store: Arc<dyn DurableStore> = Arc::new(sql);

        let cache_store: Arc<dyn CacheStore> = match config.redis_url.as_deref() {
            Some(url) => {
                info!("Connecting to cache tier...");
                let redis = RedisStore::with_prefix(url, config.redis_prefix.as_deref()).await;
                let redis = match redis {
                    Ok(redis) => redis,
                    Err(source) => {
                        metrics::set_backend_healthy("redis", false);
                        return Err(ConnectError::Backend { tier: "cache", source });
                    }
                };
                if let Err(e) = redis.ping().await {
                    // ConnectionManager reconnects on its own
                    warn!(error = %e, "Redis connected but not answering PING");
                }
                metrics::set_backend_healthy("redis", true);
                Arc::new(redis)
            }
            None => {
                warn!("No redis_url configured, cache tier is in-process");
                Arc::new(InMemoryCache::new())
            }
        };

        info!(
            cache_ttl_secs = config.cache_ttl_secs,
            resync_slots = config.resync_worker_slots(),
            "Sync coordinator ready"
        );
        Ok(Self::new(config, cache_store, durable_store, admins))
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Typed cache-tier access, for tooling and tests.
    pub fn cache_tier(&self) -> &CacheTier {
        &self.cache
    }

    /// Typed durable-tier access, for tooling and tests.
    pub fn durable_tier(&self) -> &DurableTier {
        &self.durable
    }

    /// Number of propagation tasks still running.
    #[must_use]
    pub fn pending_syncs(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every propagation task spawned so far has finished.
    ///
    /// Tasks spawned while waiting are waited for as well.
    pub async fn wait_for_pending(&self) {
        let _guard = self.barrier.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Drain in-flight propagation, then close both backends.
    ///
    /// Writes issued after this call still reach the cache tier but their
    /// propagation is not waited for.
    pub async fn shutdown(&self) {
        info!(pending = self.pending_syncs(), "Shutting down sync coordinator...");
        {
            let _guard = self.barrier.lock().await;
            self.tracker.close();
            self.tracker.wait().await;
        }
        self.cache.store().close().await;
        self.durable.store().close().await;
        info!("Sync coordinator shutdown complete");
    }
}

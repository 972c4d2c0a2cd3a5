//! Admin-id allow-list providers.
//!
//! The allow-list is configuration owned by someone else (chat admins,
//! a config file). It's polled on every admin-status check, never cached
//! by the coordinator, so a swap is visible on the next read.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::config::SyncConfig;

/// Source of the current admin allow-list.
pub trait AdminProvider: Send + Sync {
    fn admin_ids(&self) -> HashSet<i64>;

    fn is_admin(&self, id: i64) -> bool {
        self.admin_ids().contains(&id)
    }
}

/// Fixed allow-list, typically from [`SyncConfig::admin_ids`].
#[derive(Debug, Clone, Default)]
pub struct StaticAdmins {
    ids: HashSet<i64>,
}

impl StaticAdmins {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self { ids: ids.into_iter().collect() }
    }

    /// The `admin_ids` list from configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.admin_ids.iter().copied())
    }
}

impl AdminProvider for StaticAdmins {
    fn admin_ids(&self) -> HashSet<i64> {
        self.ids.clone()
    }

    fn is_admin(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }
}

/// Allow-list that can be replaced at runtime (e.g. after re-reading chat admins).
#[derive(Debug, Default)]
pub struct SharedAdmins {
    ids: RwLock<HashSet<i64>>,
}

impl SharedAdmins {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self { ids: RwLock::new(ids.into_iter().collect()) }
    }

    /// Swap in a new allow-list.
    pub fn replace(&self, ids: impl IntoIterator<Item = i64>) {
        *self.ids.write() = ids.into_iter().collect();
    }

    pub fn insert(&self, id: i64) -> bool {
        self.ids.write().insert(id)
    }

    pub fn remove(&self, id: i64) -> bool {
        self.ids.write().remove(&id)
    }
}

impl AdminProvider for SharedAdmins {
    fn admin_ids(&self) -> HashSet<i64> {
        self.ids.read().clone()
    }

    fn is_admin(&self, id: i64) -> bool {
        self.ids.read().contains(&id)
    }
}

//! Typed adapters over the two storage tiers.
//!
//! [`CacheTier`] and [`DurableTier`] wrap a raw backend ([`CacheStore`] or
//! [`DurableStore`]) and expose records instead of bytes and rows. Both
//! implement [`UserTier`], so jobs that treat the tiers alike (admin
//! refresh, audit) work over `&dyn UserTier` without knowing which is which.
//!
//! [`CacheStore`]: crate::storage::traits::CacheStore
//! [`DurableStore`]: crate::storage::traits::DurableStore

pub mod cache;
pub mod durable;

use async_trait::async_trait;

use crate::record::{TierCounts, UserField, UserRecord};
use crate::storage::traits::StorageError;

pub use cache::CacheTier;
pub use durable::DurableTier;

/// User-record capabilities shared by both tiers.
#[async_trait]
pub trait UserTier: Send + Sync {
    /// Short label for logs and metrics ("cache", "durable").
    fn tier_name(&self) -> &'static str;

    /// A missing record is `Err(NotFound)`.
    async fn get_user(&self, id: i64) -> Result<UserRecord, StorageError>;

    async fn save_user(&self, user: &UserRecord) -> Result<(), StorageError>;

    /// Every record the tier currently holds.
    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError>;

    /// Returns affected records; zero means the id is unknown to this tier.
    async fn update_user_field(&self, id: i64, field: &UserField) -> Result<u64, StorageError>;

    async fn counts(&self) -> Result<TierCounts, StorageError>;
}

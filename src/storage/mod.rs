//! Storage backends.
//!
//! - [`traits`]: `CacheStore` / `DurableStore` and the shared `StorageError`
//! - [`redis`]: cache tier over Redis
//! - [`sql`]: durable tier over MySQL or SQLite (sqlx `Any`)
//! - [`memory`]: in-process implementations of both, for tests and single-instance use

pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;

//! Producing a user record when the cache tier can't answer.
//!
//! The durable tier is asked first (creating the row on first access).
//! If that fails too, a default record is synthesized from the admin
//! allow-list so reads never dead-end. Synthesized records are never
//! written to the durable tier from here.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::admin::AdminProvider;
use crate::metrics;
use crate::record::UserRecord;
use crate::tier::DurableTier;

/// Why the cache tier didn't answer a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No entry (never cached or expired).
    Miss,
    /// Entry present but undecodable.
    Corrupt,
    /// Cache tier unreachable.
    Unavailable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Miss => "miss",
            Self::Corrupt => "corrupt",
            Self::Unavailable => "unavailable",
        }
    }

    /// Backfilling a tier that just failed is pointless.
    #[must_use]
    pub fn allows_backfill(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resolved record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Durable,
    Synthesized,
}

impl ResolvedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Synthesized => "synthesized",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub record: UserRecord,
    pub source: ResolvedFrom,
}

#[derive(Clone)]
pub struct FallbackResolver {
    durable: DurableTier,
    admins: Arc<dyn AdminProvider>,
}

impl FallbackResolver {
    pub fn new(durable: DurableTier, admins: Arc<dyn AdminProvider>) -> Self {
        Self { durable, admins }
    }

    /// Default record for an id neither tier can produce.
    #[must_use]
    pub fn synthesize(&self, id: i64) -> UserRecord {
        UserRecord::new(id, self.admins.is_admin(id))
    }

    /// Resolve a record for `id`. Never fails.
    pub async fn resolve(&self, id: i64, reason: FallbackReason) -> Resolution {
        let resolution = match self.durable.get_or_create_user(id).await {
            Ok(record) => {
                debug!(user_id = id, reason = %reason, "Resolved user from durable tier");
                Resolution { record, source: ResolvedFrom::Durable }
            }
            Err(e) => {
                warn!(user_id = id, reason = %reason, error = %e, "Durable tier failed, synthesizing default user");
                Resolution { record: self.synthesize(id), source: ResolvedFrom::Synthesized }
            }
        };
        metrics::record_fallback(resolution.source.as_str(), reason.as_str());
        resolution
    }
}

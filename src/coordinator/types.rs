//! Public types for the sync coordinator.

use thiserror::Error;

use crate::config::ConfigError;
use crate::record::TierCounts;
use crate::storage::traits::StorageError;

/// Result of replicating one record from the cache tier to the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Durable tier now holds the cache tier's value.
    Synced,
    /// Cache tier no longer had the record; nothing was written.
    SourceGone,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::SourceGone => "source_gone",
        }
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a propagation task failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("propagation task panicked: {0}")]
    Panicked(String),
}

impl SyncFailure {
    /// Worth another attempt. A panic is never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Panicked(_) => false,
        }
    }
}

/// Result of a full cache → durable resync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Ids enumerated from the cache tier
    pub total: usize,
    pub synced: usize,
    /// Expired or corrupt between enumeration and propagation
    pub skipped: usize,
    /// Errors and panics
    pub failed: usize,
}

impl ResyncReport {
    /// Check if no task failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub(super) fn record(&mut self, result: &Result<SyncOutcome, SyncFailure>) {
        match result {
            Ok(SyncOutcome::Synced) => self.synced += 1,
            Ok(SyncOutcome::SourceGone) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Result of re-deriving admin flags from the allow-list.
///
/// Counts are per tier record, so a user present in both tiers counts twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminRefreshReport {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl AdminRefreshReport {
    pub(super) fn merge(&mut self, other: &AdminRefreshReport) {
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

/// Side-by-side aggregate counts from both tiers.
///
/// A tier that couldn't be counted is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub cache: Option<TierCounts>,
    pub durable: Option<TierCounts>,
    /// Value of the cache tier's propagation failure counter
    pub propagation_failures: Option<i64>,
}

impl ConsistencyReport {
    /// Names of the measures on which the two tiers disagree.
    ///
    /// Empty when either side is missing. The cache tier is a subset
    /// projection, so a difference is expected and only observed.
    #[must_use]
    pub fn divergent_measures(&self) -> Vec<&'static str> {
        let (Some(cache), Some(durable)) = (&self.cache, &self.durable) else {
            return Vec::new();
        };
        let pairs = [
            ("total", cache.total, durable.total),
            ("active", cache.active, durable.active),
            ("muted", cache.muted, durable.muted),
            ("restricted", cache.restricted, durable.restricted),
            ("banned", cache.banned, durable.banned),
            ("admins", cache.admins, durable.admins),
            ("winners", cache.winners, durable.winners),
        ];
        pairs
            .into_iter()
            .filter(|(_, c, d)| c != d)
            .map(|(name, _, _)| name)
            .collect()
    }
}

/// Failure to build a coordinator from configuration.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} is required")]
    MissingUrl(&'static str),

    #[error("{tier} tier connection failed: {source}")]
    Backend {
        tier: &'static str,
        #[source]
        source: StorageError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_outcome_display() {
        assert_eq!(format!("{}", SyncOutcome::Synced), "synced");
        assert_eq!(format!("{}", SyncOutcome::SourceGone), "source_gone");
    }

    #[test]
    fn test_sync_failure_retryable() {
        assert!(SyncFailure::from(StorageError::Unavailable("down".into())).is_retryable());
        assert!(!SyncFailure::from(StorageError::NotFound).is_retryable());
        assert!(!SyncFailure::Panicked("boom".into()).is_retryable());
    }

    #[test]
    fn test_resync_report_record() {
        let mut report = ResyncReport { total: 4, ..Default::default() };
        report.record(&Ok(SyncOutcome::Synced));
        report.record(&Ok(SyncOutcome::SourceGone));
        report.record(&Err(SyncFailure::Panicked("boom".into())));
        report.record(&Err(StorageError::Unavailable("down".into()).into()));

        assert_eq!(report, ResyncReport { total: 4, synced: 1, skipped: 1, failed: 2 });
        assert!(!report.is_success());
    }

    #[test]
    fn test_divergent_measures() {
        let cache = TierCounts { total: 2, active: 2, admins: 1, ..Default::default() };
        let durable = TierCounts { total: 3, active: 3, admins: 1, ..Default::default() };
        let report = ConsistencyReport {
            cache: Some(cache),
            durable: Some(durable),
            propagation_failures: None,
        };
        assert_eq!(report.divergent_measures(), vec!["total", "active"]);

        let partial = ConsistencyReport { cache: Some(cache), ..Default::default() };
        assert!(partial.divergent_measures().is_empty());
    }

    #[test]
    fn test_connect_error_display() {
        let err = ConnectError::Backend {
            tier: "cache",
            source: StorageError::Unavailable("refused".into()),
        };
        assert!(err.to_string().starts_with("cache tier connection failed"));
        assert_eq!(ConnectError::MissingUrl("sql_url").to_string(), "sql_url is required");
    }
}

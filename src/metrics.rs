// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for record-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service picks the exporter (Prometheus, OTEL, etc.).
//!
//! # Metric Naming Convention
//! - `record_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: cache, durable
//! - `operation`: get_user, set_user, save_user, update_field, ...
//! - `status`: hit, miss, corrupt, success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a tier operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "record_sync_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "record_sync_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a read that was answered by the fallback path.
///
/// `source` is where the answer came from (`durable`, `synthesized`),
/// `reason` why the cache didn't answer (`miss`, `corrupt`, `unavailable`).
pub fn record_fallback(source: &str, reason: &str) {
    counter!(
        "record_sync_fallback_total",
        "source" => source.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record the end of a background propagation task
pub fn record_propagation(outcome: &str) {
    counter!(
        "record_sync_propagations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set the number of propagation tasks still running
pub fn set_pending_propagations(count: usize) {
    gauge!("record_sync_pending_propagations").set(count as f64);
}

/// Record per-record results of a reconciliation job
pub fn record_job_results(job: &str, outcome: &str, count: usize) {
    counter!(
        "record_sync_job_records_total",
        "job" => job.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(count as u64);
}

/// Record a whole job run
pub fn record_job_duration(job: &str, duration: Duration) {
    histogram!(
        "record_sync_job_seconds",
        "job" => job.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set a tier's population as seen by the last consistency audit
pub fn set_audit_count(tier: &str, measure: &str, value: u64) {
    gauge!(
        "record_sync_audit_records",
        "tier" => tier.to_string(),
        "measure" => measure.to_string()
    )
    .set(value as f64);
}

/// Record a cache-vs-durable disagreement found by the audit
pub fn record_audit_divergence(measure: &str) {
    counter!(
        "record_sync_audit_divergence_total",
        "measure" => measure.to_string()
    )
    .increment(1);
}

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "record_sync_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}

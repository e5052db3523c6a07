// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for offline-sync.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host
//! application installs the recorder/exporter.
//!
//! # Metric Naming Convention
//! - `offline_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: create, update, delete (operations) or the conflict kind
//! - `collection`: record collection
//! - `outcome`: synced, conflict, retrying, dead_lettered, ...
//! - `pass`: full, incremental

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::queue::operation::QueueCounts;

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a mutation entering the queue
pub fn record_enqueue(kind: &str, collection: &str) {
    counter!(
        "offline_sync_enqueued_total",
        "kind" => kind.to_string(),
        "collection" => collection.to_string()
    )
    .increment(1);
}

/// Record an operation reaching dead-letter
pub fn record_dead_letter(collection: &str) {
    counter!(
        "offline_sync_dead_letters_total",
        "collection" => collection.to_string()
    )
    .increment(1);
}

/// Set queue population gauges
pub fn set_queue_counts(counts: &QueueCounts) {
    gauge!("offline_sync_queue_pending").set(counts.pending as f64);
    gauge!("offline_sync_queue_retrying").set(counts.retrying as f64);
    gauge!("offline_sync_queue_awaiting_user").set(counts.awaiting_user as f64);
    gauge!("offline_sync_queue_dead_letter").set(counts.dead_letter as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE APPLY
// ═══════════════════════════════════════════════════════════════════════════

/// Record the outcome of one remote apply
pub fn record_operation(kind: &str, outcome: &str) {
    counter!(
        "offline_sync_operations_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote apply latency
pub fn record_apply_latency(kind: &str, duration: Duration) {
    histogram!(
        "offline_sync_apply_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a resolved conflict
pub fn record_conflict(kind: &str, strategy: &str) {
    counter!(
        "offline_sync_conflicts_total",
        "kind" => kind.to_string(),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PASSES
// ═══════════════════════════════════════════════════════════════════════════

/// Record a completed sync pass
pub fn record_pass(pass: &str, duration: Duration, synced: usize, failed: usize) {
    histogram!(
        "offline_sync_pass_seconds",
        "pass" => pass.to_string()
    )
    .record(duration.as_secs_f64());
    counter!("offline_sync_synced_total").increment(synced as u64);
    counter!("offline_sync_failed_total").increment(failed as u64);
}

/// Record a pass cut short by its timeout
pub fn record_pass_timeout(pass: &str) {
    counter!(
        "offline_sync_pass_timeouts_total",
        "pass" => pass.to_string()
    )
    .increment(1);
}

/// Record a state machine transition
pub fn set_state(state: &str) {
    counter!(
        "offline_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// HEALTH
// ═══════════════════════════════════════════════════════════════════════════

/// Set health score (0.0 - 1.0)
pub fn set_health_score(score: f64) {
    gauge!("offline_sync_health_score").set(score);
}

/// Set connectivity (1 = sync allowed, 0 = offline)
pub fn set_online(online: bool) {
    gauge!("offline_sync_online").set(if online { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCAL STORAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a local storage failure
pub fn record_storage_error(operation: &str) {
    counter!(
        "offline_sync_storage_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record data corruption detection
pub fn record_corruption(collection: &str) {
    counter!(
        "offline_sync_corruption_detected_total",
        "collection" => collection.to_string()
    )
    .increment(1);
}

/// Record expired cache records removed
pub fn record_expired(count: usize) {
    counter!("offline_sync_expired_records_total").increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder every call is a no-op; these only
    // guard against panics in label construction.
    #[test]
    fn test_metrics_without_recorder() {
        record_enqueue("update", "notes");
        record_dead_letter("notes");
        set_queue_counts(&QueueCounts::default());
        record_operation("create", "synced");
        record_apply_latency("create", Duration::from_millis(3));
        record_conflict("data_modified", "merge");
        record_pass("full", Duration::from_secs(1), 3, 1);
        record_pass_timeout("full");
        set_state("Idle");
        set_health_score(0.5);
        set_online(true);
        record_storage_error("put");
        record_corruption("notes");
        record_expired(2);
    }
}

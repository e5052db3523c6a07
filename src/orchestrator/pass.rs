// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync passes: draining the queue against the remote.
//!
//! Per-operation failures never abort a pass; they are counted in the
//! [`SyncResult`] and recorded on the operation, whether the remote refused
//! it or a local step failed afterwards. A pass only fails as a whole when
//! the queue itself cannot be read.
//!
//! Operations on one record go out in enqueue order. A later operation is
//! deferred while an earlier one on its record is still queued, and for the
//! rest of a pass once an earlier one stalled (not due, failed, held or
//! dead-lettered).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::conflict::{ConflictResolver, ResolutionStrategy, SyncConflict};
use crate::error::SyncError;
use crate::payload::Payload;
use crate::queue::operation::{OpKind, SyncOperation};
use crate::queue::FailureOutcome;
use crate::remote::{RemoteError, RemoteOutcome};
use crate::storage::now_millis;

use super::types::{PassKind, SyncEvent, SyncProgress, SyncResult, SyncState};
use super::SyncOrchestrator;

/// Why a pass stopped before the queue was empty.
enum Interruption {
    TimedOut,
    NetworkLost,
    Stopping,
}

impl SyncOrchestrator {
    /// Run one pass under the pass lock.
    ///
    /// Without `force`, returns an `already_in_progress` result when another
    /// pass holds the lock; with `force`, waits for it.
    pub(super) async fn run_pass(&self, kind: PassKind, force: bool) -> Result<SyncResult, SyncError> {
        let _guard = if force {
            self.pass_lock.lock().await
        } else {
            match self.pass_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(pass = %kind, "Pass skipped, another is in progress");
                    return Ok(SyncResult::in_progress());
                }
            }
        };

        if self.is_stopped() {
            return Err(SyncError::Stopped);
        }
        if !self.network_allowed() {
            self.set_state(self.resting_state());
            return Err(SyncError::Network(format!(
                "no usable network ({})",
                self.connectivity()
            )));
        }

        self.set_state(SyncState::Syncing);
        let started = Instant::now();
        let outcome = self.drain(kind, started).await;
        let elapsed = started.elapsed();

        self.progress.send_replace(SyncProgress::default());
        match &outcome {
            Ok(result) => {
                {
                    let mut history = self.history.lock();
                    history.last_error = None;
                    if result.failed == 0 && !result.timed_out {
                        history.last_success_at = Some(now_millis());
                    }
                    history.last_result = Some(result.clone());
                }
                crate::metrics::record_pass(kind.as_str(), elapsed, result.synced, result.failed);
                info!(
                    pass = %kind,
                    synced = result.synced,
                    failed = result.failed,
                    conflicts = result.conflicts_resolved,
                    awaiting_user = result.awaiting_user,
                    dead_lettered = result.dead_lettered,
                    deferred = result.deferred,
                    timed_out = result.timed_out,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Sync pass complete"
                );
                self.set_state(self.resting_state());
                self.emit(SyncEvent::PassCompleted {
                    pass: kind,
                    result: result.clone(),
                });
            }
            Err(e) => {
                warn!(pass = %kind, error = %e, "Sync pass failed");
                self.history.lock().last_error = Some(e.to_string());
                self.set_state(SyncState::Error);
            }
        }
        if let Ok(counts) = self.queue.counts().await {
            debug!(pending = counts.pending, dead_letter = counts.dead_letter, "Queue after pass");
        }
        outcome
    }

    #[tracing::instrument(skip(self, started), fields(pass = %kind))]
    async fn drain(&self, kind: PassKind, started: Instant) -> Result<SyncResult, SyncError> {
        let config = self.config();
        let deadline = started + config.pass_timeout();
        let mut result = SyncResult::default();
        let mut attempted: HashSet<u64> = HashSet::new();
        // Earliest op per record that did not leave the queue this pass
        let mut stalled: HashMap<(String, String), u64> = HashMap::new();

        let expected = match kind {
            PassKind::Full => self.queue.counts().await?.pending,
            PassKind::Incremental => config.incremental_batch_size,
        };
        self.progress.send_replace(SyncProgress {
            pass: Some(kind),
            total: expected,
            started_at: Some(now_millis()),
            ..SyncProgress::default()
        });

        'batches: loop {
            let batch = match kind {
                // Ops already handled this pass may still be pending (retrying,
                // rebased); over-fetch so new ones always surface
                PassKind::Full => self.queue.dequeue_batch(config.batch_size + attempted.len(), None).await?,
                PassKind::Incremental => {
                    self.queue
                        .dequeue_batch(config.incremental_batch_size, Some(config.high_priority_threshold))
                        .await?
                }
            };
            let batch: Vec<SyncOperation> = batch.into_iter().filter(|op| !attempted.contains(&op.id)).collect();
            if batch.is_empty() {
                break;
            }
            if kind == PassKind::Incremental {
                self.progress.send_modify(|p| p.total = batch.len());
            }

            for op in batch {
                if let Some(reason) = self.interruption(deadline) {
                    match reason {
                        Interruption::TimedOut => {
                            warn!(pass = %kind, budget_secs = config.pass_timeout_secs, "Sync pass timed out");
                            crate::metrics::record_pass_timeout(kind.as_str());
                            result.timed_out = true;
                        }
                        Interruption::NetworkLost => {
                            info!(pass = %kind, "Network lost mid-pass, remaining operations wait");
                            result.errors.push("network lost during pass".to_string());
                        }
                        Interruption::Stopping => debug!("Stopping, pass ends early"),
                    }
                    break 'batches;
                }

                attempted.insert(op.id);
                let record = (op.collection.clone(), op.record_id.clone());
                if stalled.get(&record).is_some_and(|first| *first < op.id) {
                    result.deferred += 1;
                    continue;
                }
                if let Some(earlier) = self.queue.predecessor(&op).await? {
                    debug!(
                        op_id = op.id,
                        waits_for = earlier.id,
                        record_id = %op.record_id,
                        "Earlier operation on the record still queued"
                    );
                    result.deferred += 1;
                    continue;
                }
                if !self.queue.is_due(&op, now_millis()) {
                    result.deferred += 1;
                    stall(&mut stalled, record, op.id);
                    continue;
                }

                self.report_current(&op, started);
                let settled = match self.process_operation(&op, &mut result).await {
                    Ok(settled) => settled,
                    Err(e) => {
                        self.record_local_failure(&op, e, &mut result).await;
                        false
                    }
                };
                if !settled {
                    stall(&mut stalled, record, op.id);
                }
                self.report_done(&result, started);
            }

            if kind == PassKind::Incremental {
                break;
            }
        }

        Ok(result)
    }

    fn interruption(&self, deadline: Instant) -> Option<Interruption> {
        if self.is_stopped() {
            Some(Interruption::Stopping)
        } else if Instant::now() >= deadline {
            Some(Interruption::TimedOut)
        } else if !self.network_allowed() {
            Some(Interruption::NetworkLost)
        } else {
            None
        }
    }

    /// Send one operation and act on the answer. Returns whether the
    /// operation left the queue.
    async fn process_operation(&self, op: &SyncOperation, result: &mut SyncResult) -> Result<bool, SyncError> {
        let sent = Instant::now();
        let outcome = self.remote.apply(op).await;
        crate::metrics::record_apply_latency(op.op_kind.as_str(), sent.elapsed());

        match outcome {
            RemoteOutcome::Success(canonical) => {
                // Remove first: the remote has the change even if the
                // write-back below fails
                self.queue.remove(op.id).await?;
                result.synced += 1;
                crate::metrics::record_operation(op.op_kind.as_str(), "synced");
                debug!(op_id = op.id, kind = %op.op_kind, record_id = %op.record_id, "Operation synced");

                if let Some(payload) = canonical.filter(|_| op.op_kind != OpKind::Delete) {
                    let ttl = self.config.read().default_ttl();
                    if let Err(e) = self.cache.put(&op.collection, &op.record_id, payload, ttl).await {
                        warn!(op_id = op.id, record_id = %op.record_id, error = %e, "Canonical record not cached");
                        crate::metrics::record_storage_error("write_back");
                        result.errors.push(format!("operation {} synced but not cached: {}", op.id, e));
                    }
                }
                Ok(true)
            }
            RemoteOutcome::Conflict { remote, kind } => {
                self.set_state(SyncState::ResolvingConflicts);
                let handled = self.handle_conflict(op, remote, kind, result).await;
                self.set_state(SyncState::Syncing);
                handled
            }
            RemoteOutcome::Error(RemoteError::Rejected { reason, permanent: true }) => {
                crate::metrics::record_operation(op.op_kind.as_str(), "rejected");
                self.queue.dead_letter(op.id, &format!("rejected by remote: {}", reason)).await?;
                result.failed += 1;
                result.errors.push(format!("operation {} rejected: {}", op.id, reason));
                self.record_dead_letter(op, &reason, result);
                Ok(false)
            }
            RemoteOutcome::Error(error) => {
                crate::metrics::record_operation(op.op_kind.as_str(), "failed");
                let message = error.to_string();
                let outcome = self.queue.record_failure(op.id, &message).await?;
                result.failed += 1;
                result.errors.push(format!("operation {}: {}", op.id, message));
                match outcome {
                    FailureOutcome::Retrying { retry_count } => {
                        debug!(op_id = op.id, retry_count, error = %message, "Operation failed, will retry");
                    }
                    FailureOutcome::DeadLettered => self.record_dead_letter(op, &message, result),
                }
                Ok(false)
            }
        }
    }

    /// A local step failed after the remote answered. The attempt counts
    /// against the retry budget like a remote failure.
    async fn record_local_failure(&self, op: &SyncOperation, error: SyncError, result: &mut SyncResult) {
        let message = error.to_string();
        warn!(
            op_id = op.id,
            record = %format!("{}/{}", op.collection, op.record_id),
            error = %message,
            "Local failure while applying operation"
        );
        crate::metrics::record_storage_error("apply_result");
        crate::metrics::record_operation(op.op_kind.as_str(), "failed");
        result.failed += 1;
        result.errors.push(format!("operation {}: {}", op.id, message));

        match self.queue.record_failure(op.id, &message).await {
            Ok(FailureOutcome::Retrying { retry_count }) => {
                debug!(op_id = op.id, retry_count, "Operation will be retried after local failure");
            }
            Ok(FailureOutcome::DeadLettered) => self.record_dead_letter(op, &message, result),
            Err(e) => {
                warn!(op_id = op.id, error = %e, "Could not record failure on operation");
                result.errors.push(format!("operation {}: failure not recorded: {}", op.id, e));
            }
        }
    }

    fn record_dead_letter(&self, op: &SyncOperation, reason: &str, result: &mut SyncResult) {
        result.dead_lettered += 1;
        self.emit(SyncEvent::DeadLettered {
            op_id: op.id,
            collection: op.collection.clone(),
            record_id: op.record_id.clone(),
            reason: reason.to_string(),
        });
    }

    async fn handle_conflict(
        &self,
        op: &SyncOperation,
        remote: Option<Payload>,
        kind: Option<crate::conflict::ConflictKind>,
        result: &mut SyncResult,
    ) -> Result<bool, SyncError> {
        let local_value = op.payload.as_ref().map(Payload::to_value).transpose()?;
        let remote_value = remote.as_ref().map(Payload::to_value).transpose()?;
        let kind = kind.unwrap_or_else(|| ConflictResolver::classify(local_value.as_ref(), remote_value.as_ref()));

        let conflict = SyncConflict::new(
            op.collection.clone(),
            op.record_id.clone(),
            kind,
            local_value,
            remote_value,
            now_millis(),
        );
        let resolution = self.resolver.resolve(&conflict);
        crate::metrics::record_conflict(kind.as_str(), resolution.strategy.as_str());
        info!(
            op_id = op.id,
            collection = %op.collection,
            record_id = %op.record_id,
            %kind,
            strategy = %resolution.strategy,
            rationale = %resolution.rationale,
            "Conflict resolved"
        );

        let ttl = self.config.read().default_ttl();
        match resolution.strategy {
            ResolutionStrategy::UseRemote => {
                match (&resolution.resolved, remote) {
                    // Keep the remote's exact bytes so hashes line up
                    (Some(_), Some(remote)) => {
                        self.cache.put(&op.collection, &op.record_id, remote, ttl).await?;
                    }
                    (Some(value), None) => {
                        self.cache.put(&op.collection, &op.record_id, Payload::from_value(value), ttl).await?;
                    }
                    (None, _) => {
                        self.cache.delete(&op.collection, &op.record_id).await?;
                    }
                }
                self.queue.remove(op.id).await?;
                result.conflicts_resolved += 1;
                return Ok(true);
            }
            ResolutionStrategy::UseLocal | ResolutionStrategy::Merge => {
                let remote_hash = remote.as_ref().map(|p| p.content_hash().to_string());
                match resolution.resolved {
                    Some(value) => {
                        let payload = Payload::from_value(&value);
                        self.cache.put(&op.collection, &op.record_id, payload.clone(), ttl).await?;
                        let op_kind = if remote.is_some() { OpKind::Update } else { OpKind::Create };
                        self.queue.rebase(op.id, op_kind, Some(payload), remote_hash).await?;
                    }
                    None => {
                        self.cache.delete(&op.collection, &op.record_id).await?;
                        self.queue.rebase(op.id, OpKind::Delete, None, remote_hash).await?;
                    }
                }
                result.conflicts_resolved += 1;
            }
            ResolutionStrategy::Manual => {
                self.queue.mark_awaiting_user(op.id, &resolution.rationale).await?;
                result.awaiting_user += 1;
                self.emit(SyncEvent::ConflictNeedsUser {
                    op_id: op.id,
                    collection: op.collection.clone(),
                    record_id: op.record_id.clone(),
                    rationale: resolution.rationale,
                });
            }
        }
        Ok(false)
    }

    fn report_current(&self, op: &SyncOperation, started: Instant) {
        let current = format!("{}/{}", op.collection, op.record_id);
        self.progress.send_modify(|p| {
            p.current_operation = Some(current);
            p.elapsed_ms = started.elapsed().as_millis() as u64;
        });
    }

    fn report_done(&self, result: &SyncResult, started: Instant) {
        let elapsed = started.elapsed();
        let done = result.synced + result.conflicts_resolved + result.awaiting_user;
        let failed = result.failed;
        self.progress.send_modify(|p| {
            p.completed = done;
            p.failed = failed;
            p.current_operation = None;
            p.elapsed_ms = elapsed.as_millis() as u64;
            p.estimated_remaining_ms = estimate_remaining(elapsed, done + failed, p.total);
        });
    }
}

fn stall(stalled: &mut HashMap<(String, String), u64>, record: (String, String), op_id: u64) {
    stalled
        .entry(record)
        .and_modify(|first| *first = (*first).min(op_id))
        .or_insert(op_id);
}

fn estimate_remaining(elapsed: Duration, finished: usize, total: usize) -> Option<u64> {
    if finished == 0 {
        return None;
    }
    let remaining = total.saturating_sub(finished) as u128;
    let per_op = elapsed.as_millis() / finished as u128;
    Some(u64::try_from(per_op * remaining).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(Duration::from_millis(100), 0, 10), None);
        assert_eq!(estimate_remaining(Duration::from_millis(100), 2, 10), Some(400));
        assert_eq!(estimate_remaining(Duration::from_millis(100), 12, 10), Some(0));
    }
}

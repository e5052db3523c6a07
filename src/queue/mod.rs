// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable, ordered backlog of local mutations.
//!
//! [`SyncQueue`] owns the retry policy on top of a [`QueueStore`]:
//!
//! ```text
//!              record_failure (retry_count <= max)
//!                 ┌─────────┐
//!                 ▼         │
//! enqueue ──► Pending ──────┘──► remove (confirmed by remote)
//!               │  ▲  │
//!   Manual      │  │  │ retry_count > max, or permanent rejection
//!   conflict    ▼  │  ▼
//!      AwaitingUser  DeadLetter
//!              └─requeue─┘
//! ```
//!
//! Nothing leaves the queue except through [`SyncQueue::remove`]. Holds are
//! kept for inspection and can be re-armed with [`SyncQueue::requeue`].
//!
//! Drain order is global, but operations on one record are applied in
//! enqueue order: [`SyncQueue::predecessor`] names the operation a later one
//! has to wait for.

pub mod operation;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::payload::Payload;
use crate::resilience::retry::RetryConfig;
use crate::storage::now_millis;
use crate::storage::traits::{QueueStore, StorageError};
use operation::{NewOperation, OpKind, OpStatus, OpStatusKind, QueueCounts, SyncOperation};

/// What [`SyncQueue::record_failure`] did with the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still pending, will be retried after its backoff
    Retrying { retry_count: u32 },
    /// Retry budget exhausted
    DeadLettered,
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    backoff: RetryConfig,
}

pub struct SyncQueue {
    store: Arc<dyn QueueStore>,
    policy: RwLock<RetryPolicy>,
}

impl SyncQueue {
    /// `max_retries` failed attempts are retried; the next one dead-letters.
    pub fn new(
        store: Arc<dyn QueueStore>,
        max_retries: u32,
        retry_delay: Duration,
        max_retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            policy: RwLock::new(RetryPolicy {
                max_retries,
                backoff: RetryConfig::operations(retry_delay, max_retry_delay),
            }),
        }
    }

    pub fn set_retry_policy(&self, max_retries: u32, retry_delay: Duration, max_retry_delay: Duration) {
        *self.policy.write() = RetryPolicy {
            max_retries,
            backoff: RetryConfig::operations(retry_delay, max_retry_delay),
        };
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.policy.read().max_retries
    }

    /// Append a mutation. Several pending operations for one record are
    /// allowed and drain in enqueue order.
    pub async fn enqueue(&self, op: NewOperation) -> Result<SyncOperation, StorageError> {
        let op = self.store.insert_operation(op, now_millis()).await?;
        debug!(
            op_id = op.id,
            kind = %op.op_kind,
            collection = %op.collection,
            record_id = %op.record_id,
            priority = op.priority,
            "Operation enqueued"
        );
        crate::metrics::record_enqueue(op.op_kind.as_str(), &op.collection);
        Ok(op)
    }

    /// Pending operations, highest priority first then FIFO. Does not claim
    /// or remove anything.
    pub async fn dequeue_batch(
        &self,
        limit: usize,
        min_priority: Option<i32>,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.pending_operations(limit, min_priority).await
    }

    pub async fn get(&self, id: u64) -> Result<Option<SyncOperation>, StorageError> {
        self.store.get_operation(id).await
    }

    /// The earliest operation on the same record that must be applied
    /// before `op`: enqueued earlier and still pending or awaiting a user.
    ///
    /// Dead-lettered operations are out of the drain path and do not block
    /// later edits of their record.
    pub async fn predecessor(&self, op: &SyncOperation) -> Result<Option<SyncOperation>, StorageError> {
        let ops = self.store.record_operations(&op.collection, &op.record_id).await?;
        Ok(ops
            .into_iter()
            .take_while(|earlier| earlier.id < op.id)
            .find(|earlier| earlier.status.kind() != OpStatusKind::DeadLetter))
    }

    /// Drop an operation the remote has confirmed.
    pub async fn remove(&self, id: u64) -> Result<bool, StorageError> {
        let removed = self.store.delete_operation(id).await?;
        if !removed {
            debug!(op_id = id, "Remove of unknown operation ignored");
        }
        Ok(removed)
    }

    /// Count a failed attempt, dead-lettering once the budget is spent.
    pub async fn record_failure(&self, id: u64, error: &str) -> Result<FailureOutcome, StorageError> {
        let mut op = self.load(id).await?;
        let max_retries = self.max_retries();

        op.retry_count = op.retry_count.saturating_add(1);
        op.last_error = Some(error.to_string());
        op.last_attempt_at = Some(now_millis());

        let outcome = if op.retry_count > max_retries {
            op.status = OpStatus::DeadLetter {
                reason: format!("retry budget exhausted after {} attempts: {}", op.retry_count, error),
            };
            FailureOutcome::DeadLettered
        } else {
            FailureOutcome::Retrying { retry_count: op.retry_count }
        };

        self.store.update_operation(&op).await?;

        match outcome {
            FailureOutcome::DeadLettered => {
                warn!(
                    op_id = id,
                    collection = %op.collection,
                    record_id = %op.record_id,
                    attempts = op.retry_count,
                    error,
                    "Operation dead-lettered"
                );
                crate::metrics::record_dead_letter(&op.collection);
            }
            FailureOutcome::Retrying { retry_count } => {
                debug!(op_id = id, retry_count, max_retries, error, "Operation will be retried");
            }
        }
        Ok(outcome)
    }

    /// Move straight to dead-letter (permanent remote rejection).
    pub async fn dead_letter(&self, id: u64, reason: &str) -> Result<SyncOperation, StorageError> {
        let mut op = self.load(id).await?;
        op.last_error = Some(reason.to_string());
        op.last_attempt_at = Some(now_millis());
        op.status = OpStatus::DeadLetter { reason: reason.to_string() };
        self.store.update_operation(&op).await?;

        warn!(op_id = id, collection = %op.collection, record_id = %op.record_id, reason, "Operation dead-lettered");
        crate::metrics::record_dead_letter(&op.collection);
        Ok(op)
    }

    /// Hold an operation until a human decides its conflict.
    pub async fn mark_awaiting_user(&self, id: u64, rationale: &str) -> Result<SyncOperation, StorageError> {
        let mut op = self.load(id).await?;
        op.status = OpStatus::AwaitingUser { rationale: rationale.to_string() };
        self.store.update_operation(&op).await?;
        info!(op_id = id, record_id = %op.record_id, rationale, "Operation awaiting user decision");
        Ok(op)
    }

    /// Replace what an operation will send after a conflict resolution,
    /// making it pending again against the remote's current version.
    pub async fn rebase(
        &self,
        id: u64,
        op_kind: OpKind,
        payload: Option<Payload>,
        base_hash: Option<String>,
    ) -> Result<SyncOperation, StorageError> {
        let mut op = self.load(id).await?;
        op.op_kind = op_kind;
        op.payload = payload;
        op.base_hash = base_hash;
        op.status = OpStatus::Pending;
        self.store.update_operation(&op).await?;
        debug!(op_id = id, kind = %op_kind, "Operation rebased");
        Ok(op)
    }

    /// Re-arm a held operation with a fresh retry budget.
    pub async fn requeue(&self, id: u64) -> Result<SyncOperation, StorageError> {
        let mut op = self.load(id).await?;
        op.status = OpStatus::Pending;
        op.retry_count = 0;
        op.last_attempt_at = None;
        self.store.update_operation(&op).await?;
        info!(op_id = id, record_id = %op.record_id, "Operation requeued");
        Ok(op)
    }

    pub async fn dead_letters(&self) -> Result<Vec<SyncOperation>, StorageError> {
        self.store.operations_with_status(OpStatusKind::DeadLetter).await
    }

    pub async fn awaiting_user(&self) -> Result<Vec<SyncOperation>, StorageError> {
        self.store.operations_with_status(OpStatusKind::AwaitingUser).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, StorageError> {
        let counts = self.store.queue_counts().await?;
        crate::metrics::set_queue_counts(&counts);
        Ok(counts)
    }

    /// Earliest time (epoch millis) the operation may be attempted again.
    #[must_use]
    pub fn next_attempt_at(&self, op: &SyncOperation) -> i64 {
        match op.last_attempt_at {
            Some(last) if op.retry_count > 0 => {
                let delay = self.policy.read().backoff.delay_for_attempt(op.retry_count);
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                last.saturating_add(delay_ms)
            }
            _ => i64::MIN,
        }
    }

    /// Whether the operation's backoff has elapsed.
    #[must_use]
    pub fn is_due(&self, op: &SyncOperation, now: i64) -> bool {
        self.next_attempt_at(op) <= now
    }

    async fn load(&self, id: u64) -> Result<SyncOperation, StorageError> {
        self.store
            .get_operation(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("operation {}", id)))
    }
}

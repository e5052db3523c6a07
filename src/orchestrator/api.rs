//! Public API: local reads, mutation intake, manual triggers and queue
//! inspection.

use tracing::{debug, info, warn};

use crate::conflict::ResolutionStrategy;
use crate::error::SyncError;
use crate::payload::Payload;
use crate::queue::operation::{NewOperation, OpKind, QueueCounts, SyncOperation};
use crate::storage::now_millis;
use crate::storage::traits::{CacheEntry, PayloadPredicate, StorageError};

use super::{PassKind, SyncOrchestrator, SyncResult};

impl SyncOrchestrator {
    // ═══════════════════════════════════════════════════════════════════════
    // LOCAL READS
    // ═══════════════════════════════════════════════════════════════════════

    /// Read a record from the local cache, with freshness metadata.
    ///
    /// Expired records are still returned; check
    /// [`CacheEntry::is_expired`] to render staleness.
    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<CacheEntry>, SyncError> {
        Ok(self.cache.get(collection, key).await?)
    }

    /// Records of a collection matching `predicate`.
    pub async fn query(
        &self,
        collection: &str,
        predicate: PayloadPredicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<CacheEntry>, SyncError> {
        Ok(self.cache.query(collection, predicate, limit).await?)
    }

    /// Drop expired cache records now instead of waiting for the timer.
    pub async fn invalidate_expired(&self) -> Result<usize, SyncError> {
        let removed = self.cache.invalidate_expired(now_millis()).await?;
        crate::metrics::record_expired(removed);
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MUTATION INTAKE
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply a local change optimistically and queue it for the remote.
    ///
    /// `Create`/`Update` need a payload; a payload passed with `Delete` is
    /// ignored. Writes to priority collections, or with a priority at or
    /// above the high-priority threshold, wake the run loop for an
    /// immediate incremental pass.
    #[tracing::instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        op_kind: OpKind,
        collection: &str,
        record_id: &str,
        payload: Option<Payload>,
        priority: i32,
    ) -> Result<SyncOperation, SyncError> {
        let payload = match op_kind {
            OpKind::Delete => None,
            OpKind::Create | OpKind::Update => Some(payload.ok_or_else(|| {
                SyncError::InvalidOperation(format!("{} of {}/{} needs a payload", op_kind, collection, record_id))
            })?),
        };

        let base_hash = match self.cache.get(collection, record_id).await {
            Ok(entry) => entry.map(|e| e.content_hash),
            // The local copy is unreadable; the change is still the user's
            Err(e @ StorageError::Corruption { .. }) => {
                warn!(collection, record_id, error = %e, "Enqueue over corrupted record, sending unconditionally");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let (priority, ttl) = {
            let config = self.config.read();
            (config.effective_priority(collection, priority), config.default_ttl())
        };

        match &payload {
            Some(body) => {
                self.cache.put(collection, record_id, body.clone(), ttl).await?;
            }
            None => {
                self.cache.delete(collection, record_id).await?;
            }
        }

        let op = self
            .queue
            .enqueue(NewOperation {
                op_kind,
                collection: collection.to_string(),
                record_id: record_id.to_string(),
                payload,
                priority,
                base_hash,
            })
            .await?;

        if self.config.read().is_high_priority(op.priority) {
            debug!(op_id = op.id, priority = op.priority, "High-priority enqueue, waking run loop");
            self.wake.notify_one();
        }
        Ok(op)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MANUAL TRIGGERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Run a full pass now, even while paused.
    ///
    /// Without `force`, a pass already running makes this return an
    /// `already_in_progress` result. With `force`, waits for it and then
    /// runs. Fails with [`SyncError::Network`] when the link does not allow
    /// syncing.
    pub async fn sync(&self, force: bool) -> Result<SyncResult, SyncError> {
        info!(force, "Manual sync requested");
        self.run_pass(PassKind::Full, force).await
    }

    /// Run one incremental pass over high-priority operations.
    pub async fn sync_incremental(&self) -> Result<SyncResult, SyncError> {
        self.run_pass(PassKind::Incremental, false).await
    }

    /// Apply a human decision to an operation held for one.
    ///
    /// - `UseLocal` re-sends the queued change unconditionally.
    /// - `Merge` sends `payload` (the merged record) unconditionally.
    /// - `UseRemote` drops the change and caches `payload` as the remote's
    ///   record, or removes the record when `payload` is `None`.
    #[tracing::instrument(skip(self, payload))]
    pub async fn resolve_manually(
        &self,
        op_id: u64,
        strategy: ResolutionStrategy,
        payload: Option<Payload>,
    ) -> Result<(), SyncError> {
        let op = self
            .queue
            .get(op_id)
            .await?
            .ok_or_else(|| SyncError::InvalidOperation(format!("operation {} does not exist", op_id)))?;
        if !op.requires_user_input() {
            return Err(SyncError::InvalidOperation(format!(
                "operation {} is not awaiting a user decision",
                op_id
            )));
        }

        let ttl = self.config.read().default_ttl();
        match strategy {
            ResolutionStrategy::UseLocal => {
                match &op.payload {
                    Some(body) => {
                        self.cache.put(&op.collection, &op.record_id, body.clone(), ttl).await?;
                    }
                    None => {
                        self.cache.delete(&op.collection, &op.record_id).await?;
                    }
                }
                self.queue.rebase(op_id, op.op_kind, op.payload.clone(), None).await?;
            }
            ResolutionStrategy::Merge => {
                let merged = payload.ok_or_else(|| {
                    SyncError::InvalidOperation(format!("merge of operation {} needs the merged record", op_id))
                })?;
                let op_kind = if op.op_kind == OpKind::Delete { OpKind::Update } else { op.op_kind };
                self.cache.put(&op.collection, &op.record_id, merged.clone(), ttl).await?;
                self.queue.rebase(op_id, op_kind, Some(merged), None).await?;
            }
            ResolutionStrategy::UseRemote => {
                match payload {
                    Some(remote) => {
                        self.cache.put(&op.collection, &op.record_id, remote, ttl).await?;
                    }
                    None => {
                        self.cache.delete(&op.collection, &op.record_id).await?;
                    }
                }
                self.queue.remove(op_id).await?;
            }
            ResolutionStrategy::Manual => {
                return Err(SyncError::InvalidOperation(
                    "a manual resolution must pick local, remote or merge".to_string(),
                ));
            }
        }

        crate::metrics::record_conflict("user_decision", strategy.as_str());
        info!(op_id, collection = %op.collection, record_id = %op.record_id, %strategy, "Conflict resolved by user");
        if strategy != ResolutionStrategy::UseRemote {
            self.wake.notify_one();
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // QUEUE INSPECTION
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn dead_letters(&self) -> Result<Vec<SyncOperation>, SyncError> {
        Ok(self.queue.dead_letters().await?)
    }

    pub async fn awaiting_user(&self) -> Result<Vec<SyncOperation>, SyncError> {
        Ok(self.queue.awaiting_user().await?)
    }

    /// Re-arm a dead-lettered operation with a fresh retry budget.
    pub async fn requeue(&self, op_id: u64) -> Result<SyncOperation, SyncError> {
        let op = self
            .queue
            .get(op_id)
            .await?
            .ok_or_else(|| SyncError::InvalidOperation(format!("operation {} does not exist", op_id)))?;
        if op.is_pending() {
            return Ok(op);
        }
        Ok(self.queue.requeue(op_id).await?)
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts, SyncError> {
        Ok(self.queue.counts().await?)
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use super::now_millis;
use super::traits::{CacheEntry, CacheStore, PayloadPredicate, QueueStore, StorageError};
use crate::payload::Payload;
use crate::queue::operation::{NewOperation, OpStatusKind, QueueCounts, SyncOperation};

/// In-process cache and queue.
pub struct InMemoryStore {
    records: DashMap<(String, String), CacheEntry>,
    queue: Mutex<QueueRows>,
}

#[derive(Default)]
struct QueueRows {
    next_id: u64,
    rows: BTreeMap<u64, SyncOperation>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            queue: Mutex::new(QueueRows {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
        }
    }

    /// Number of cached records
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every cached record (queue untouched)
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn record_key(collection: &str, key: &str) -> (String, String) {
    (collection.to_string(), key.to_string())
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn put(
        &self,
        collection: &str,
        key: &str,
        payload: Payload,
        ttl: Duration,
    ) -> Result<CacheEntry, StorageError> {
        let entry = CacheEntry::new(collection, key, payload, now_millis(), ttl);
        self.records.insert(record_key(collection, key), entry.clone());
        Ok(entry)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self
            .records
            .get(&record_key(collection, key))
            .map(|r| r.value().clone()))
    }

    async fn query(
        &self,
        collection: &str,
        predicate: PayloadPredicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<CacheEntry>, StorageError> {
        let mut candidates: Vec<CacheEntry> = self
            .records
            .iter()
            .filter(|r| r.key().0 == collection)
            .map(|r| r.value().clone())
            .collect();
        // DashMap iteration order is arbitrary
        candidates.sort_by(|a, b| a.key.cmp(&b.key));

        let limit = limit.unwrap_or(usize::MAX);
        let matches = candidates
            .into_iter()
            .filter(|entry| match entry.payload.to_value() {
                Ok(value) => predicate(&value),
                Err(e) => {
                    warn!(record = %entry.record_ref(), error = %e, "Skipping unreadable cached payload");
                    false
                }
            })
            .take(limit)
            .collect();
        Ok(matches)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.records.remove(&record_key(collection, key)).is_some())
    }

    async fn invalidate_expired(&self, now: i64) -> Result<usize, StorageError> {
        let before = self.records.len();
        self.records.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.records.len()))
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.records.len())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn insert_operation(
        &self,
        op: NewOperation,
        created_at: i64,
    ) -> Result<SyncOperation, StorageError> {
        let mut queue = self.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        let op = SyncOperation::from_new(id, op, created_at);
        queue.rows.insert(id, op.clone());
        Ok(op)
    }

    async fn pending_operations(
        &self,
        limit: usize,
        min_priority: Option<i32>,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        let queue = self.queue.lock();
        let mut pending: Vec<SyncOperation> = queue
            .rows
            .values()
            .filter(|op| op.is_pending())
            .filter(|op| min_priority.map_or(true, |min| op.priority >= min))
            .cloned()
            .collect();
        pending.sort_by(SyncOperation::drain_cmp);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn get_operation(&self, id: u64) -> Result<Option<SyncOperation>, StorageError> {
        Ok(self.queue.lock().rows.get(&id).cloned())
    }

    async fn update_operation(&self, op: &SyncOperation) -> Result<(), StorageError> {
        let mut queue = self.queue.lock();
        match queue.rows.get_mut(&op.id) {
            Some(slot) => {
                *slot = op.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("operation {}", op.id))),
        }
    }

    async fn delete_operation(&self, id: u64) -> Result<bool, StorageError> {
        Ok(self.queue.lock().rows.remove(&id).is_some())
    }

    async fn operations_with_status(
        &self,
        status: OpStatusKind,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        let queue = self.queue.lock();
        let mut ops: Vec<SyncOperation> = queue
            .rows
            .values()
            .filter(|op| op.status.kind() == status)
            .cloned()
            .collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(ops)
    }

    async fn record_operations(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        // BTreeMap iterates in id order, which is enqueue order
        let queue = self.queue.lock();
        Ok(queue
            .rows
            .values()
            .filter(|op| op.collection == collection && op.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn queue_counts(&self) -> Result<QueueCounts, StorageError> {
        let queue = self.queue.lock();
        let mut counts = QueueCounts::default();
        for op in queue.rows.values() {
            match op.status.kind() {
                OpStatusKind::Pending => {
                    counts.pending += 1;
                    if op.retry_count > 0 {
                        counts.retrying += 1;
                    }
                }
                OpStatusKind::AwaitingUser => counts.awaiting_user += 1,
                OpStatusKind::DeadLetter => counts.dead_letter += 1,
            }
        }
        Ok(counts)
    }
}

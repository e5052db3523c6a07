use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::payload::Payload;
use crate::queue::operation::{NewOperation, OpStatusKind, QueueCounts, SyncOperation};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Data corruption detected for '{id}': expected hash {expected}, got {actual}")]
    Corruption {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A cached record plus its freshness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub collection: String,
    pub key: String,
    pub payload: Payload,
    /// When this record was last written (epoch millis)
    pub freshness_at: i64,
    /// When this record stops being valid (epoch millis)
    pub expires_at: i64,
    /// Always the hash of `payload`
    pub content_hash: String,
}

impl CacheEntry {
    /// Build an entry written at `now` that lives for `ttl`.
    pub fn new(collection: &str, key: &str, payload: Payload, now: i64, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            collection: collection.to_string(),
            key: key.to_string(),
            content_hash: payload.content_hash().to_string(),
            payload,
            freshness_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    /// Milliseconds since the record was written.
    #[must_use]
    pub fn age_ms(&self, now: i64) -> i64 {
        (now - self.freshness_at).max(0)
    }

    /// Milliseconds until expiry (negative once expired).
    #[must_use]
    pub fn expires_in_ms(&self, now: i64) -> i64 {
        self.expires_at - now
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// `collection/key`, used in logs and errors.
    #[must_use]
    pub fn record_ref(&self) -> String {
        format!("{}/{}", self.collection, self.key)
    }
}

/// Predicate evaluated against each payload during [`CacheStore::query`].
pub type PayloadPredicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// Keyed snapshot storage with TTL metadata.
///
/// Writes are atomic per record. A failing record never blocks reads of
/// unrelated records.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Upsert a record, stamping freshness and expiry from `ttl`.
    async fn put(
        &self,
        collection: &str,
        key: &str,
        payload: Payload,
        ttl: Duration,
    ) -> Result<CacheEntry, StorageError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Matching records of a collection, re-evaluated on every call.
    ///
    /// Records whose payload cannot be parsed are skipped.
    async fn query(
        &self,
        collection: &str,
        predicate: PayloadPredicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<CacheEntry>, StorageError>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: &str, key: &str) -> Result<bool, StorageError>;

    /// Drop every record with `expires_at <= now`. Returns how many went.
    async fn invalidate_expired(&self, now: i64) -> Result<usize, StorageError>;

    async fn len(&self) -> Result<usize, StorageError>;
}

/// Durable backing for the sync queue.
///
/// Ordering and retry policy live in [`crate::queue::SyncQueue`]; a
/// `QueueStore` only persists rows.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append an operation, assigning the next monotonic id.
    async fn insert_operation(
        &self,
        op: NewOperation,
        created_at: i64,
    ) -> Result<SyncOperation, StorageError>;

    /// Pending operations in drain order.
    async fn pending_operations(
        &self,
        limit: usize,
        min_priority: Option<i32>,
    ) -> Result<Vec<SyncOperation>, StorageError>;

    async fn get_operation(&self, id: u64) -> Result<Option<SyncOperation>, StorageError>;

    /// Overwrite a stored operation. `NotFound` if it was removed.
    async fn update_operation(&self, op: &SyncOperation) -> Result<(), StorageError>;

    /// Returns whether an operation was removed.
    async fn delete_operation(&self, id: u64) -> Result<bool, StorageError>;

    /// Operations in a given status, oldest first.
    async fn operations_with_status(
        &self,
        status: OpStatusKind,
    ) -> Result<Vec<SyncOperation>, StorageError>;

    /// Every operation on one record, any status, in enqueue order.
    async fn record_operations(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<Vec<SyncOperation>, StorageError>;

    async fn queue_counts(&self) -> Result<QueueCounts, StorageError>;
}

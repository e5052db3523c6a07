// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite backend for the record cache and the sync queue.
//!
//! Both live in one database file so a mutation and its optimistic cache
//! write share a durability domain:
//!
//! ```sql
//! CREATE TABLE cache_records (
//!   collection   TEXT NOT NULL,
//!   key          TEXT NOT NULL,
//!   payload      BLOB NOT NULL,   -- serialized JSON
//!   content_hash TEXT NOT NULL,   -- sha256(payload), verified on read
//!   freshness_at INTEGER NOT NULL,
//!   expires_at   INTEGER NOT NULL,
//!   PRIMARY KEY (collection, key)
//! );
//!
//! CREATE TABLE sync_queue (
//!   id              INTEGER PRIMARY KEY AUTOINCREMENT,  -- never reused
//!   op_kind         TEXT NOT NULL,
//!   collection      TEXT NOT NULL,
//!   record_id       TEXT NOT NULL,
//!   payload         BLOB,
//!   base_hash       TEXT,
//!   priority        INTEGER NOT NULL,
//!   retry_count     INTEGER NOT NULL,
//!   last_error      TEXT,
//!   created_at      INTEGER NOT NULL,
//!   last_attempt_at INTEGER,
//!   status          TEXT NOT NULL,   -- pending | awaiting_user | dead_letter
//!   status_detail   TEXT
//! );
//! ```
//!
//! The database runs in WAL journal mode so UI reads are not blocked by an
//! in-flight sync pass writing results back.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{info, warn};

use super::now_millis;
use super::traits::{CacheEntry, CacheStore, PayloadPredicate, QueueStore, StorageError};
use crate::payload::{hash_bytes, Payload};
use crate::queue::operation::{
    NewOperation, OpKind, OpStatus, OpStatusKind, QueueCounts, SyncOperation,
};
use crate::resilience::retry::{retry, RetryConfig};

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS cache_records (
        collection TEXT NOT NULL,
        key TEXT NOT NULL,
        payload BLOB NOT NULL,
        content_hash TEXT NOT NULL,
        freshness_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (collection, key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_records (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        op_kind TEXT NOT NULL,
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        payload BLOB,
        base_hash TEXT,
        priority INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        last_attempt_at INTEGER,
        status TEXT NOT NULL DEFAULT 'pending',
        status_detail TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_queue_drain ON sync_queue (status, priority DESC, created_at, id)",
    "CREATE INDEX IF NOT EXISTS idx_queue_record ON sync_queue (collection, record_id, id)",
];

/// Rows fetched per round trip by [`CacheStore::query`].
const QUERY_PAGE: i64 = 128;

const QUEUE_COLUMNS: &str = "id, op_kind, collection, record_id, payload, base_hash, priority, \
     retry_count, last_error, created_at, last_attempt_at, status, status_detail";

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct SqlStore {
    pool: SqlitePool,
    location: String,
}

impl SqlStore {
    /// Open (creating if needed) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let location = path.as_ref().to_string_lossy().to_string();
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = retry("sqlite_open", &RetryConfig::startup(), || async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.clone())
                .await
                .map_err(backend)
        })
        .await?;

        info!(path = %location, "Opened local sync database");
        let store = Self { pool, location };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database (single connection, gone on drop).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(backend)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self {
            pool,
            location: ":memory:".to_string(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Where the database lives, for logs.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Flush the SQLite WAL into the main file.
    pub async fn checkpoint(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("WAL checkpoint failed: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            retry("sqlite_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(backend)
            })
            .await?;
        }
        Ok(())
    }

    fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry, StorageError> {
        let collection: String = row.try_get("collection").map_err(backend)?;
        let key: String = row.try_get("key").map_err(backend)?;
        let bytes: Vec<u8> = row.try_get("payload").map_err(backend)?;
        let stored_hash: String = row.try_get("content_hash").map_err(backend)?;

        let actual = hash_bytes(&bytes);
        if actual != stored_hash {
            crate::metrics::record_corruption(&collection);
            return Err(StorageError::Corruption {
                id: format!("{}/{}", collection, key),
                expected: stored_hash,
                actual,
            });
        }

        Ok(CacheEntry {
            collection,
            key,
            payload: Payload::from_trusted_bytes(bytes),
            freshness_at: row.try_get("freshness_at").map_err(backend)?,
            expires_at: row.try_get("expires_at").map_err(backend)?,
            content_hash: stored_hash,
        })
    }

    fn operation_from_row(row: &SqliteRow) -> Result<SyncOperation, StorageError> {
        let id: i64 = row.try_get("id").map_err(backend)?;
        let op_kind: String = row.try_get("op_kind").map_err(backend)?;
        let status: String = row.try_get("status").map_err(backend)?;
        let payload: Option<Vec<u8>> = row.try_get("payload").map_err(backend)?;
        let retry_count: i64 = row.try_get("retry_count").map_err(backend)?;

        let op_kind = OpKind::from_str(&op_kind).map_err(StorageError::Backend)?;
        let status_kind = OpStatusKind::from_str(&status).map_err(StorageError::Backend)?;

        Ok(SyncOperation {
            id: id as u64,
            op_kind,
            collection: row.try_get("collection").map_err(backend)?,
            record_id: row.try_get("record_id").map_err(backend)?,
            payload: payload.map(Payload::from_trusted_bytes),
            priority: row.try_get("priority").map_err(backend)?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_error: row.try_get("last_error").map_err(backend)?,
            created_at: row.try_get("created_at").map_err(backend)?,
            last_attempt_at: row.try_get("last_attempt_at").map_err(backend)?,
            base_hash: row.try_get("base_hash").map_err(backend)?,
            status: OpStatus::from_parts(status_kind, row.try_get("status_detail").map_err(backend)?),
        })
    }
}

#[async_trait]
impl CacheStore for SqlStore {
    async fn put(
        &self,
        collection: &str,
        key: &str,
        payload: Payload,
        ttl: Duration,
    ) -> Result<CacheEntry, StorageError> {
        let entry = CacheEntry::new(collection, key, payload, now_millis(), ttl);

        retry("cache_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO cache_records (collection, key, payload, content_hash, freshness_at, expires_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(collection, key) DO UPDATE SET
                    payload = excluded.payload,
                    content_hash = excluded.content_hash,
                    freshness_at = excluded.freshness_at,
                    expires_at = excluded.expires_at",
            )
            .bind(&entry.collection)
            .bind(&entry.key)
            .bind(entry.payload.as_bytes())
            .bind(&entry.content_hash)
            .bind(entry.freshness_at)
            .bind(entry.expires_at)
            .execute(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        Ok(entry)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let row = retry("cache_get", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT collection, key, payload, content_hash, freshness_at, expires_at
                 FROM cache_records WHERE collection = ? AND key = ?",
            )
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn query(
        &self,
        collection: &str,
        predicate: PayloadPredicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<CacheEntry>, StorageError> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut matches = Vec::new();
        let mut after = String::new();

        // Keyset pages: rows are only read until `limit` matches are found
        'pages: while matches.len() < limit {
            let rows = retry("cache_query", &RetryConfig::query(), || async {
                sqlx::query(
                    "SELECT collection, key, payload, content_hash, freshness_at, expires_at
                     FROM cache_records WHERE collection = ? AND key > ? ORDER BY key LIMIT ?",
                )
                .bind(collection)
                .bind(&after)
                .bind(QUERY_PAGE)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
            })
            .await?;
            let Some(last) = rows.last() else { break };
            after = last.try_get("key").map_err(backend)?;
            let exhausted = rows.len() < QUERY_PAGE as usize;

            for row in &rows {
                if matches.len() >= limit {
                    break 'pages;
                }
                // One bad row must not hide the rest of the collection
                let entry = match Self::entry_from_row(row) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(collection, error = %e, "Skipping unreadable cached record");
                        continue;
                    }
                };
                match entry.payload.to_value() {
                    Ok(value) if predicate(&value) => matches.push(entry),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(record = %entry.record_ref(), error = %e, "Skipping unparseable cached payload");
                    }
                }
            }
            if exhausted {
                break;
            }
        }
        Ok(matches)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        let result = retry("cache_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM cache_records WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn invalidate_expired(&self, now: i64) -> Result<usize, StorageError> {
        let result = retry("cache_invalidate_expired", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM cache_records WHERE expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_records")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl QueueStore for SqlStore {
    async fn insert_operation(
        &self,
        op: NewOperation,
        created_at: i64,
    ) -> Result<SyncOperation, StorageError> {
        let result = retry("queue_insert", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO sync_queue (op_kind, collection, record_id, payload, base_hash, priority, created_at, status)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 'pending')",
            )
            .bind(op.op_kind.as_str())
            .bind(&op.collection)
            .bind(&op.record_id)
            .bind(op.payload.as_ref().map(|p| p.as_bytes().to_vec()))
            .bind(&op.base_hash)
            .bind(op.priority)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        let id = result.last_insert_rowid() as u64;
        Ok(SyncOperation::from_new(id, op, created_at))
    }

    async fn pending_operations(
        &self,
        limit: usize,
        min_priority: Option<i32>,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {} FROM sync_queue
             WHERE status = 'pending' AND priority >= ?
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT ?",
            QUEUE_COLUMNS
        );
        let rows = retry("queue_pending", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(min_priority.unwrap_or(i32::MIN))
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        rows.iter().map(Self::operation_from_row).collect()
    }

    async fn get_operation(&self, id: u64) -> Result<Option<SyncOperation>, StorageError> {
        let sql = format!("SELECT {} FROM sync_queue WHERE id = ?", QUEUE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::operation_from_row).transpose()
    }

    async fn update_operation(&self, op: &SyncOperation) -> Result<(), StorageError> {
        let result = retry("queue_update", &RetryConfig::query(), || async {
            sqlx::query(
                "UPDATE sync_queue SET
                    op_kind = ?, payload = ?, base_hash = ?, priority = ?, retry_count = ?,
                    last_error = ?, last_attempt_at = ?, status = ?, status_detail = ?
                 WHERE id = ?",
            )
            .bind(op.op_kind.as_str())
            .bind(op.payload.as_ref().map(|p| p.as_bytes().to_vec()))
            .bind(&op.base_hash)
            .bind(op.priority)
            .bind(i64::from(op.retry_count))
            .bind(&op.last_error)
            .bind(op.last_attempt_at)
            .bind(op.status.kind().as_str())
            .bind(op.status.detail())
            .bind(op.id as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("operation {}", op.id)));
        }
        Ok(())
    }

    async fn delete_operation(&self, id: u64) -> Result<bool, StorageError> {
        let result = retry("queue_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM sync_queue WHERE id = ?")
                .bind(id as i64)
                .execute(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn operations_with_status(
        &self,
        status: OpStatusKind,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sync_queue WHERE status = ? ORDER BY created_at ASC, id ASC",
            QUEUE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(Self::operation_from_row).collect()
    }

    async fn record_operations(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sync_queue WHERE collection = ? AND record_id = ? ORDER BY id ASC",
            QUEUE_COLUMNS
        );
        let rows = retry("queue_record_ops", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(collection)
                .bind(record_id)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        rows.iter().map(Self::operation_from_row).collect()
    }

    async fn queue_counts(&self) -> Result<QueueCounts, StorageError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total, SUM(CASE WHEN retry_count > 0 THEN 1 ELSE 0 END) AS retrying
             FROM sync_queue GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(backend)?;
            let total: i64 = row.try_get("total").map_err(backend)?;
            let retrying: Option<i64> = row.try_get("retrying").map_err(backend)?;
            match OpStatusKind::from_str(&status).map_err(StorageError::Backend)? {
                OpStatusKind::Pending => {
                    counts.pending = total as usize;
                    counts.retrying = retrying.unwrap_or(0) as usize;
                }
                OpStatusKind::AwaitingUser => counts.awaiting_user = total as usize,
                OpStatusKind::DeadLetter => counts.dead_letter = total as usize,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn new_op(record: &str, priority: i32, kind: OpKind) -> NewOperation {
        NewOperation {
            op_kind: kind,
            collection: "bookings".into(),
            record_id: record.into(),
            payload: match kind {
                OpKind::Delete => None,
                _ => Some(Payload::from_value(&json!({"id": record}))),
            },
            priority,
            base_hash: Some("abc".into()),
        }
    }

    #[tokio::test]
    async fn test_cache_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SqlStore::open(dir.path().join("cache.db")).await.unwrap();

        let written = store
            .put("vehicles", "veh-1", Payload::from_value(&json!({"vin": "WVW123"})), HOUR)
            .await
            .unwrap();
        let read = store.get("vehicles", "veh-1").await.unwrap().unwrap();

        assert_eq!(read, written);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("vehicles", "veh-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");

        {
            let store = SqlStore::open(&path).await.unwrap();
            store.put("c", "k", Payload::from_value(&json!({"n": 1})), HOUR).await.unwrap();
            store.insert_operation(new_op("k", 2, OpKind::Create), 10).await.unwrap();
            store.close().await;
        }

        let store = SqlStore::open(&path).await.unwrap();
        assert!(store.get("c", "k").await.unwrap().is_some());
        let pending = store.pending_operations(10, None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op_kind, OpKind::Create);
        assert_eq!(pending[0].base_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_corrupted_row_is_isolated() {
        let store = SqlStore::in_memory().await.unwrap();
        store.put("c", "good", Payload::from_value(&json!({"ok": true})), HOUR).await.unwrap();
        store.put("c", "bad", Payload::from_value(&json!({"ok": true})), HOUR).await.unwrap();

        sqlx::query("UPDATE cache_records SET payload = ? WHERE key = 'bad'")
            .bind(b"{\"ok\":false}".to_vec())
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(matches!(
            store.get("c", "bad").await,
            Err(StorageError::Corruption { .. })
        ));
        assert!(store.get("c", "good").await.unwrap().is_some());

        let all = store.query("c", &|_| true, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "good");
    }

    #[tokio::test]
    async fn test_invalidate_expired() {
        let store = SqlStore::in_memory().await.unwrap();
        store.put("c", "stale", Payload::from_value(&json!({})), Duration::ZERO).await.unwrap();
        store.put("c", "fresh", Payload::from_value(&json!({})), HOUR).await.unwrap();

        assert_eq!(store.invalidate_expired(now_millis()).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_drain_order() {
        let store = SqlStore::in_memory().await.unwrap();
        let low = store.insert_operation(new_op("low", 1, OpKind::Update), 1).await.unwrap();
        let high_late = store.insert_operation(new_op("high-late", 5, OpKind::Update), 3).await.unwrap();
        let high_early = store.insert_operation(new_op("high-early", 5, OpKind::Delete), 2).await.unwrap();

        let ids: Vec<u64> = store
            .pending_operations(10, None)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![high_early.id, high_late.id, low.id]);

        let urgent = store.pending_operations(10, Some(5)).await.unwrap();
        assert_eq!(urgent.len(), 2);
        assert!(urgent.iter().all(|o| o.priority >= 5));
        assert!(urgent.iter().any(|o| o.payload.is_none()));
    }

    #[tokio::test]
    async fn test_queue_update_and_counts() {
        let store = SqlStore::in_memory().await.unwrap();
        let mut a = store.insert_operation(new_op("a", 1, OpKind::Update), 1).await.unwrap();
        let mut b = store.insert_operation(new_op("b", 1, OpKind::Update), 2).await.unwrap();
        store.insert_operation(new_op("c", 1, OpKind::Update), 3).await.unwrap();

        a.retry_count = 2;
        a.last_error = Some("timeout".into());
        a.last_attempt_at = Some(99);
        store.update_operation(&a).await.unwrap();

        b.status = OpStatus::AwaitingUser { rationale: "both edited".into() };
        store.update_operation(&b).await.unwrap();

        let reread = store.get_operation(a.id).await.unwrap().unwrap();
        assert_eq!(reread, a);

        let counts = store.queue_counts().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.retrying, 1);
        assert_eq!(counts.awaiting_user, 1);
        assert_eq!(counts.dead_letter, 0);

        let held = store.operations_with_status(OpStatusKind::AwaitingUser).await.unwrap();
        assert_eq!(held[0].status.detail(), Some("both edited"));
    }

    #[tokio::test]
    async fn test_queue_delete() {
        let store = SqlStore::in_memory().await.unwrap();
        let op = store.insert_operation(new_op("a", 1, OpKind::Update), 1).await.unwrap();
        assert!(store.delete_operation(op.id).await.unwrap());
        assert!(!store.delete_operation(op.id).await.unwrap());
        assert!(matches!(
            store.update_operation(&op).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_spans_pages() {
        let store = SqlStore::in_memory().await.unwrap();
        let total = QUERY_PAGE as usize * 2 + 5;
        for i in 0..total {
            let body = json!({"i": i, "even": i % 2 == 0});
            store.put("pages", &format!("k-{:04}", i), Payload::from_value(&body), HOUR).await.unwrap();
        }
        store.put("other", "k-0000", Payload::from_value(&json!({"even": true})), HOUR).await.unwrap();

        let all = store.query("pages", &|_| true, None).await.unwrap();
        assert_eq!(all.len(), total);
        assert!(all.windows(2).all(|w| w[0].key < w[1].key));

        let even = |v: &serde_json::Value| v["even"] == json!(true);
        assert_eq!(store.query("pages", &even, None).await.unwrap().len(), (total + 1) / 2);

        let first = store.query("pages", &even, Some(3)).await.unwrap();
        let keys: Vec<&str> = first.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["k-0000", "k-0002", "k-0004"]);
    }

    #[tokio::test]
    async fn test_record_operations_in_enqueue_order() {
        let store = SqlStore::in_memory().await.unwrap();
        let first = store.insert_operation(new_op("r-1", 1, OpKind::Update), 5).await.unwrap();
        store.insert_operation(new_op("r-2", 9, OpKind::Update), 6).await.unwrap();
        let mut second = store.insert_operation(new_op("r-1", 9, OpKind::Delete), 7).await.unwrap();
        second.status = OpStatus::DeadLetter { reason: "gone".into() };
        store.update_operation(&second).await.unwrap();

        let ops = store.record_operations("bookings", "r-1").await.unwrap();
        let ids: Vec<u64> = ops.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert!(store.record_operations("bookings", "missing").await.unwrap().is_empty());
    }
}

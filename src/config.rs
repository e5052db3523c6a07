//! Configuration for the sync orchestrator.
//!
//! # Example
//!
//! ```
//! use offline_sync::SyncConfig;
//!
//! // Defaults: sync every 15 minutes, 3 retries, batches of 50
//! let config = SyncConfig::default();
//! assert_eq!(config.sync_interval_secs, 900);
//! assert_eq!(config.max_retries, 3);
//!
//! // Metered connection, critical bookings first
//! let config = SyncConfig {
//!     wifi_only: true,
//!     priority_collections: vec!["emergency_contacts".into()],
//!     batch_size: 20,
//!     ..Default::default()
//! };
//! assert!(config.is_priority_collection("emergency_contacts"));
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Sync orchestrator settings.
///
/// Every field has a default so hosts can deserialize a partial document.
/// Changes pushed through the orchestrator's config channel take effect on
/// the next timer tick or pass.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncConfig {
    /// Seconds between periodic full passes (default: 15 min)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Failed attempts retried before an operation is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base between attempts of one operation
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Treat cellular as offline
    #[serde(default)]
    pub wifi_only: bool,

    /// Keep syncing while the app is backgrounded
    #[serde(default = "default_background_sync")]
    pub background_sync: bool,

    /// Collections whose writes always drain as high priority
    #[serde(default)]
    pub priority_collections: Vec<String>,

    /// Priority at or above which an enqueue triggers an immediate pass
    #[serde(default = "default_high_priority_threshold")]
    pub high_priority_threshold: i32,

    /// Operations fetched per full-pass batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Operations per incremental pass
    #[serde(default = "default_incremental_batch_size")]
    pub incremental_batch_size: usize,

    /// Budget for one pass, checked between operations
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,

    /// TTL for records written through the orchestrator
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// SQLite file; `None` keeps everything in memory
    #[serde(default)]
    pub db_path: Option<String>,
}

fn default_sync_interval_secs() -> u64 { 15 * 60 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 30_000 }
fn default_max_retry_delay_ms() -> u64 { 15 * 60 * 1000 }
fn default_background_sync() -> bool { true }
fn default_high_priority_threshold() -> i32 { 8 }
fn default_batch_size() -> usize { 50 }
fn default_incremental_batch_size() -> usize { 10 }
fn default_pass_timeout_secs() -> u64 { 5 * 60 }
fn default_ttl_secs() -> u64 { 24 * 60 * 60 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            wifi_only: false,
            background_sync: default_background_sync(),
            priority_collections: Vec::new(),
            high_priority_threshold: default_high_priority_threshold(),
            batch_size: default_batch_size(),
            incremental_batch_size: default_incremental_batch_size(),
            pass_timeout_secs: default_pass_timeout_secs(),
            default_ttl_secs: default_ttl_secs(),
            db_path: None,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms.max(self.retry_delay_ms))
    }

    #[must_use]
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub fn is_priority_collection(&self, collection: &str) -> bool {
        self.priority_collections.iter().any(|c| c == collection)
    }

    /// Priority an operation drains with: priority collections are raised
    /// to the high-priority threshold.
    #[must_use]
    pub fn effective_priority(&self, collection: &str, priority: i32) -> i32 {
        if self.is_priority_collection(collection) {
            priority.max(self.high_priority_threshold)
        } else {
            priority
        }
    }

    #[must_use]
    pub fn is_high_priority(&self, priority: i32) -> bool {
        priority >= self.high_priority_threshold
    }
}

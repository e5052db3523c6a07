// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! The [`SyncOrchestrator`] owns the cache, the queue and the resolver, and
//! drives the sync lifecycle:
//! - optimistic local writes plus enqueue ([`SyncOrchestrator::enqueue`])
//! - periodic full passes and immediate incremental passes for
//!   high-priority writes
//! - conflict resolution on the write-back path
//! - connectivity, pause and background handling
//!
//! # States
//!
//! ```text
//!             timer / manual              conflict reported
//!   Idle ─────────────────────► Syncing ◄──────────────────► ResolvingConflicts
//!    ▲  ▲                          │
//!    │  └──────── pass done ───────┘──── pass could not run ───► Error
//!    │
//!    │ link back (incremental pass)        link lost (any state)
//!   WaitingForNetwork ◄───────────────────────────────────────────
//!
//!   Paused: pause(), or backgrounded with background_sync = false
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use offline_sync::{
//!     Connectivity, OpKind, Payload, RemoteApplier, RemoteOutcome, SyncConfig, SyncOperation,
//!     SyncOrchestrator,
//! };
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! struct Api;
//!
//! #[async_trait]
//! impl RemoteApplier for Api {
//!     async fn apply(&self, _op: &SyncOperation) -> RemoteOutcome {
//!         RemoteOutcome::Success(None)
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), offline_sync::SyncError> {
//! let config = SyncConfig { db_path: Some("sync.db".into()), ..Default::default() };
//! let (_config_tx, config_rx) = watch::channel(config.clone());
//! let (net_tx, net_rx) = watch::channel(Connectivity::Wifi);
//!
//! let orchestrator = Arc::new(SyncOrchestrator::open(config, config_rx, Arc::new(Api), net_rx).await?);
//! tokio::spawn({
//!     let orchestrator = orchestrator.clone();
//!     async move { orchestrator.run().await }
//! });
//!
//! orchestrator
//!     .enqueue(OpKind::Update, "bookings", "b-1", Some(Payload::from_value(&json!({"slot": "09:00"}))), 5)
//!     .await?;
//!
//! net_tx.send_replace(Connectivity::Offline);
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod api;
mod health;
mod lifecycle;
mod pass;
mod types;

pub use types::{PassKind, SyncEvent, SyncHealth, SyncProgress, SyncResult, SyncState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::queue::SyncQueue;
use crate::remote::RemoteApplier;
use crate::storage::memory::InMemoryStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{CacheStore, QueueStore};

use types::PassHistory;

const EVENT_CAPACITY: usize = 256;

/// Connectivity-aware driver of the sync lifecycle.
///
/// `Send + Sync`: share it behind an `Arc`, spawn [`run()`](Self::run) once
/// and call the API from anywhere. Only one pass runs at a time; reads and
/// enqueues never wait for a pass.
pub struct SyncOrchestrator {
    /// Current configuration (replaced on updates from `config_rx`)
    pub(super) config: RwLock<SyncConfig>,

    /// Runtime config updates, consumed by the run loop
    pub(super) config_rx: Mutex<watch::Receiver<SyncConfig>>,

    pub(super) cache: Arc<dyn CacheStore>,
    pub(super) queue: SyncQueue,
    pub(super) remote: Arc<dyn RemoteApplier>,
    pub(super) resolver: ConflictResolver,

    /// Link state published by the host
    pub(super) connectivity_rx: watch::Receiver<Connectivity>,

    pub(super) state: watch::Sender<SyncState>,
    pub(super) state_rx: watch::Receiver<SyncState>,
    pub(super) progress: watch::Sender<SyncProgress>,
    pub(super) events: broadcast::Sender<SyncEvent>,

    /// Held for the whole of a pass
    pub(super) pass_lock: Mutex<()>,

    /// Poked by high-priority enqueues and `resume()`
    pub(super) wake: Notify,

    pub(super) shutdown: watch::Sender<bool>,
    pub(super) paused: AtomicBool,
    pub(super) foreground: AtomicBool,
    pub(super) history: SyncMutex<PassHistory>,
}

impl SyncOrchestrator {
    /// Build an orchestrator over explicitly owned stores.
    ///
    /// Starts in `Idle`; nothing happens until [`run()`](Self::run) is
    /// spawned or [`sync()`](Self::sync) is called.
    pub fn new(
        config: SyncConfig,
        config_rx: watch::Receiver<SyncConfig>,
        cache: Arc<dyn CacheStore>,
        queue_store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteApplier>,
        connectivity_rx: watch::Receiver<Connectivity>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        let (progress_tx, _) = watch::channel(SyncProgress::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let queue = SyncQueue::new(
            queue_store,
            config.max_retries,
            config.retry_delay(),
            config.max_retry_delay(),
        );

        Self {
            config: RwLock::new(config),
            config_rx: Mutex::new(config_rx),
            cache,
            queue,
            remote,
            resolver: ConflictResolver::new(),
            connectivity_rx,
            state: state_tx,
            state_rx,
            progress: progress_tx,
            events,
            pass_lock: Mutex::new(()),
            wake: Notify::new(),
            shutdown,
            paused: AtomicBool::new(false),
            foreground: AtomicBool::new(true),
            history: SyncMutex::new(PassHistory::default()),
        }
    }

    /// Open local storage per `config.db_path` (SQLite file, or memory when
    /// unset) and build an orchestrator over it.
    pub async fn open(
        config: SyncConfig,
        config_rx: watch::Receiver<SyncConfig>,
        remote: Arc<dyn RemoteApplier>,
        connectivity_rx: watch::Receiver<Connectivity>,
    ) -> Result<Self, SyncError> {
        let (cache, queue): (Arc<dyn CacheStore>, Arc<dyn QueueStore>) = match &config.db_path {
            Some(path) => {
                let store = Arc::new(SqlStore::open(path).await?);
                info!(path = %store.location(), "Using SQLite for cache and queue");
                (store.clone() as Arc<dyn CacheStore>, store as Arc<dyn QueueStore>)
            }
            None => {
                let store = Arc::new(InMemoryStore::new());
                info!("No db_path configured, cache and queue are in memory only");
                (store.clone() as Arc<dyn CacheStore>, store as Arc<dyn QueueStore>)
            }
        };
        Ok(Self::new(config, config_rx, cache, queue, remote, connectivity_rx))
    }

    /// Get current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    /// Get a receiver to watch pass progress.
    #[must_use]
    pub fn progress_receiver(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Subscribe to [`SyncEvent`]s. Slow subscribers may miss events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity_rx.borrow()
    }

    /// Whether the current link allows syncing.
    #[must_use]
    pub fn network_allowed(&self) -> bool {
        self.connectivity().allows_sync(self.config.read().wifi_only)
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
            || (!self.foreground.load(Ordering::Acquire) && !self.config.read().background_sync)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Result of the most recent pass that ran.
    #[must_use]
    pub fn last_result(&self) -> Option<SyncResult> {
        self.history.lock().last_result.clone()
    }

    pub(super) fn set_state(&self, to: SyncState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!(%from, %to, "Sync state changed");
            crate::metrics::set_state(&to.to_string());
            self.emit(SyncEvent::StateChanged { from, to });
        }
    }

    /// State to settle in when no pass is running. A missing network
    /// outranks a pause; the pause still holds once the link is back.
    pub(super) fn resting_state(&self) -> SyncState {
        if !self.network_allowed() {
            SyncState::WaitingForNetwork
        } else if self.is_paused() {
            SyncState::Paused
        } else {
            SyncState::Idle
        }
    }

    pub(super) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

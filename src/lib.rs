//! # Offline Sync
//!
//! Offline-first sync core: local reads and writes always succeed against a
//! local cache, and a durable queue carries every change to the remote store
//! once the network allows it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Mutation Intake                        │
//! │  • enqueue(): optimistic cache write + queued operation    │
//! │  • High-priority writes wake the orchestrator              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Local Cache Store + Sync Queue                 │
//! │  • SQLite file (or memory), content-hashed records         │
//! │  • Priority then FIFO drain order                          │
//! │  • Retry budget with backoff, then dead-letter             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (Sync passes, when connectivity allows)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Remote Applier (host)                    │
//! │  • Success / Conflict / Error per operation                │
//! │  • Conflicts go through the deterministic resolver         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! See [`orchestrator`] for a complete example wiring a remote applier and
//! a connectivity channel into a [`SyncOrchestrator`].
//!
//! ## Modules
//!
//! - [`orchestrator`]: The [`SyncOrchestrator`] state machine and sync passes
//! - [`storage`]: Cache and queue persistence (SQLite, memory)
//! - [`queue`]: Ordered mutation backlog with retry and dead-letter handling
//! - [`conflict`]: Conflict classification, merge and resolution policy
//! - [`resilience`]: Retry with exponential backoff
//! - [`remote`]: The seam to the remote store

pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod payload;
pub mod queue;
pub mod remote;
pub mod resilience;
pub mod storage;

pub use config::SyncConfig;
pub use conflict::{
    ConflictError, ConflictKind, ConflictResolution, ConflictResolver, ResolutionStrategy, SyncConflict,
};
pub use connectivity::Connectivity;
pub use error::SyncError;
pub use orchestrator::{PassKind, SyncEvent, SyncHealth, SyncOrchestrator, SyncProgress, SyncResult, SyncState};
pub use payload::Payload;
pub use queue::operation::{NewOperation, OpKind, OpStatus, QueueCounts, SyncOperation};
pub use queue::{FailureOutcome, SyncQueue};
pub use remote::{RemoteApplier, RemoteError, RemoteOutcome};
pub use resilience::retry::RetryConfig;
pub use storage::memory::InMemoryStore;
pub use storage::sql::SqlStore;
pub use storage::traits::{CacheEntry, CacheStore, QueueStore, StorageError};

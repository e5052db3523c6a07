// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict classification and resolution.
//!
//! Everything here is pure: no storage, no clock, no I/O. The orchestrator
//! builds a [`SyncConflict`] from what the remote reported and applies the
//! returned [`ConflictResolution`].
//!
//! # Example
//!
//! ```
//! use offline_sync::conflict::{ConflictKind, ConflictResolver, ResolutionStrategy, SyncConflict};
//! use serde_json::json;
//!
//! let conflict = SyncConflict::new(
//!     "service_logs",
//!     "log-17",
//!     ConflictKind::DataModified,
//!     Some(json!({"count": 5, "updated_at": 100})),
//!     Some(json!({"count": 7, "updated_at": 90})),
//!     1_000,
//! );
//!
//! let resolution = ConflictResolver::new().resolve(&conflict);
//! assert_eq!(resolution.strategy, ResolutionStrategy::Merge);
//! assert_eq!(resolution.resolved, Some(json!({"count": 7, "updated_at": 100})));
//! ```

pub mod merge;
pub mod resolver;
pub mod schema;
pub mod timestamp;
mod types;

pub use resolver::ConflictResolver;
pub use schema::UNMAPPED_KEY;
pub use types::{ConflictError, ConflictKind, ConflictResolution, ResolutionStrategy, SyncConflict};

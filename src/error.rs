// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-level error taxonomy.
//!
//! Per-operation failures inside a sync pass are never returned from the
//! pass itself; they are counted in
//! [`SyncResult`](crate::orchestrator::SyncResult) and kept on the queued
//! operation. `SyncError` is what the public API returns to a caller.

use thiserror::Error;

use crate::conflict::ConflictError;
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Local I/O failed for the record being touched
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Transient connectivity failure talking to the remote
    #[error("Network error: {0}")]
    Network(String),

    /// The remote refused the operation
    #[error("Remote rejected operation {op_id}: {reason}")]
    RemoteRejection { op_id: u64, reason: String },

    /// The operation is waiting on a human decision
    #[error("Conflict on {collection}/{record_id} needs a user decision: {rationale}")]
    ConflictUnresolved {
        collection: String,
        record_id: String,
        rationale: String,
    },

    #[error(transparent)]
    SchemaMigration(#[from] ConflictError),

    /// Retry budget exhausted
    #[error("Operation {op_id} is dead-lettered: {reason}")]
    DeadLetter { op_id: u64, reason: String },

    #[error("A sync pass is already in progress")]
    AlreadyInProgress,

    #[error("Orchestrator is stopped")]
    Stopped,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl SyncError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::AlreadyInProgress)
            || matches!(self, Self::Storage(StorageError::Backend(_)))
    }
}

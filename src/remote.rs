// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The outbound seam: applying one queued operation to the remote store.
//!
//! The wire protocol is the host's business. An implementation receives the
//! operation (including `base_hash`, the hash of the record version the
//! local change was made against) and reports what happened:
//!
//! - `Success`: applied; optionally returns the canonical record
//! - `Conflict`: the remote's current record no longer matches `base_hash`
//! - `Error`: transient network failure or a rejection

use async_trait::async_trait;
use thiserror::Error;

use crate::conflict::ConflictKind;
use crate::payload::Payload;
use crate::queue::operation::SyncOperation;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Request did not complete; retry later
    #[error("network failure: {0}")]
    Network(String),
    /// The remote refused the operation
    #[error("rejected by remote: {reason}")]
    Rejected {
        reason: String,
        /// Validation or authorization failures that will never succeed
        permanent: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Success(Option<Payload>),
    Conflict {
        /// `None` when the remote no longer has the record
        remote: Option<Payload>,
        /// Set when the remote already knows the kind of divergence
        kind: Option<ConflictKind>,
    },
    Error(RemoteError),
}

impl RemoteOutcome {
    #[must_use]
    pub fn conflict(remote: Option<Payload>) -> Self {
        Self::Conflict { remote, kind: None }
    }

    #[must_use]
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Error(RemoteError::Network(reason.into()))
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>, permanent: bool) -> Self {
        Self::Error(RemoteError::Rejected {
            reason: reason.into(),
            permanent,
        })
    }
}

#[async_trait]
pub trait RemoteApplier: Send + Sync {
    /// Apply one operation. Called at most once at a time per orchestrator
    /// and always awaited to completion.
    async fn apply(&self, op: &SyncOperation) -> RemoteOutcome;
}

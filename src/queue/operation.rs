// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued mutation types.

use std::fmt;
use std::str::FromStr;

use crate::payload::Payload;

/// Kind of local mutation waiting to reach the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown op kind '{}'", other)),
        }
    }
}

/// Where an operation sits in its lifecycle.
///
/// `Pending` is the only state drained by sync passes. `AwaitingUser` and
/// `DeadLetter` are explicit holds: the operation is retained for a human or
/// an operator and never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpStatus {
    /// Waiting to be applied remotely
    Pending,
    /// Conflict needs a human decision
    AwaitingUser { rationale: String },
    /// Retry budget exhausted or permanently rejected
    DeadLetter { reason: String },
}

impl OpStatus {
    #[must_use]
    pub fn kind(&self) -> OpStatusKind {
        match self {
            Self::Pending => OpStatusKind::Pending,
            Self::AwaitingUser { .. } => OpStatusKind::AwaitingUser,
            Self::DeadLetter { .. } => OpStatusKind::DeadLetter,
        }
    }

    /// Free-text detail attached to a hold state.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::AwaitingUser { rationale } => Some(rationale),
            Self::DeadLetter { reason } => Some(reason),
        }
    }

    pub(crate) fn from_parts(kind: OpStatusKind, detail: Option<String>) -> Self {
        match kind {
            OpStatusKind::Pending => Self::Pending,
            OpStatusKind::AwaitingUser => Self::AwaitingUser {
                rationale: detail.unwrap_or_default(),
            },
            OpStatusKind::DeadLetter => Self::DeadLetter {
                reason: detail.unwrap_or_default(),
            },
        }
    }
}

/// Status discriminant, used for storage and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpStatusKind {
    Pending,
    AwaitingUser,
    DeadLetter,
}

impl OpStatusKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingUser => "awaiting_user",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl FromStr for OpStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting_user" => Ok(Self::AwaitingUser),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(format!("unknown op status '{}'", other)),
        }
    }
}

/// A mutation about to be appended to the queue.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub op_kind: OpKind,
    pub collection: String,
    pub record_id: String,
    /// Body to send; `None` for deletes
    pub payload: Option<Payload>,
    pub priority: i32,
    /// Content hash of the cached record this change was made against
    pub base_hash: Option<String>,
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOperation {
    /// Monotonic, assigned on enqueue
    pub id: u64,
    pub op_kind: OpKind,
    pub collection: String,
    pub record_id: String,
    pub payload: Option<Payload>,
    pub priority: i32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Epoch millis
    pub created_at: i64,
    /// Epoch millis of the last failed attempt
    pub last_attempt_at: Option<i64>,
    pub base_hash: Option<String>,
    pub status: OpStatus,
}

impl SyncOperation {
    pub(crate) fn from_new(id: u64, new: NewOperation, created_at: i64) -> Self {
        Self {
            id,
            op_kind: new.op_kind,
            collection: new.collection,
            record_id: new.record_id,
            payload: new.payload,
            priority: new.priority,
            retry_count: 0,
            last_error: None,
            created_at,
            last_attempt_at: None,
            base_hash: new.base_hash,
            status: OpStatus::Pending,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OpStatus::Pending
    }

    #[must_use]
    pub fn requires_user_input(&self) -> bool {
        matches!(self.status, OpStatus::AwaitingUser { .. })
    }

    /// Drain order: priority descending, then FIFO within a tier.
    #[must_use]
    pub fn drain_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

/// Queue population by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Drainable operations (includes retrying ones)
    pub pending: usize,
    /// Pending operations with at least one failed attempt
    pub retrying: usize,
    pub awaiting_user: usize,
    pub dead_letter: usize,
}

impl QueueCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.awaiting_user + self.dead_letter
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict input and output types.

use serde_json::Value;
use thiserror::Error;

/// How the local and remote snapshots diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Both sides changed the record
    DataModified,
    /// One side (or both) no longer has the record
    RecordDeleted,
    /// Only version bookkeeping differs
    VersionMismatch,
    /// The remote record uses a different schema
    SchemaChange,
}

impl ConflictKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataModified => "data_modified",
            Self::RecordDeleted => "record_deleted",
            Self::VersionMismatch => "version_mismatch",
            Self::SchemaChange => "schema_change",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataModified => write!(f, "DataModified"),
            Self::RecordDeleted => write!(f, "RecordDeleted"),
            Self::VersionMismatch => write!(f, "VersionMismatch"),
            Self::SchemaChange => write!(f, "SchemaChange"),
        }
    }
}

/// A detected divergence, built only as resolver input.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict {
    pub collection: String,
    pub record_id: String,
    pub kind: ConflictKind,
    /// `None` when the record is absent locally
    pub local: Option<Value>,
    /// `None` when the record is absent remotely
    pub remote: Option<Value>,
    /// Epoch millis; also the reference point for recency checks
    pub detected_at: i64,
}

impl SyncConflict {
    pub fn new(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        kind: ConflictKind,
        local: Option<Value>,
        remote: Option<Value>,
        detected_at: i64,
    ) -> Self {
        Self {
            collection: collection.into(),
            record_id: record_id.into(),
            kind,
            local: local.filter(|v| !v.is_null()),
            remote: remote.filter(|v| !v.is_null()),
            detected_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStrategy {
    UseLocal,
    UseRemote,
    Merge,
    Manual,
}

impl ResolutionStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseLocal => "use_local",
            Self::UseRemote => "use_remote",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseLocal => write!(f, "UseLocal"),
            Self::UseRemote => write!(f, "UseRemote"),
            Self::Merge => write!(f, "Merge"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// The resolver's decision.
///
/// `resolved` is the record that should end up in the cache: `None` with
/// `UseRemote` means the record is gone. `Manual` never carries a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    pub resolved: Option<Value>,
    pub rationale: String,
    pub requires_user_input: bool,
}

impl ConflictResolution {
    pub fn use_local(resolved: Option<Value>, rationale: impl Into<String>) -> Self {
        Self {
            strategy: ResolutionStrategy::UseLocal,
            resolved,
            rationale: rationale.into(),
            requires_user_input: false,
        }
    }

    pub fn use_remote(resolved: Option<Value>, rationale: impl Into<String>) -> Self {
        Self {
            strategy: ResolutionStrategy::UseRemote,
            resolved,
            rationale: rationale.into(),
            requires_user_input: false,
        }
    }

    pub fn merge(resolved: Value, rationale: impl Into<String>) -> Self {
        Self {
            strategy: ResolutionStrategy::Merge,
            resolved: Some(resolved),
            rationale: rationale.into(),
            requires_user_input: false,
        }
    }

    pub fn manual(rationale: impl Into<String>) -> Self {
        Self {
            strategy: ResolutionStrategy::Manual,
            resolved: None,
            rationale: rationale.into(),
            requires_user_input: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConflictError {
    #[error("Schema migration failed for field '{field}': {reason}")]
    SchemaMigration { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_snapshots_count_as_absent() {
        let conflict = SyncConflict::new("notes", "n1", ConflictKind::RecordDeleted, Some(json!({"a": 1})), Some(Value::Null), 0);
        assert!(conflict.local.is_some());
        assert!(conflict.remote.is_none());
    }

    #[test]
    fn test_manual_requires_user() {
        let r = ConflictResolution::manual("too different");
        assert!(r.requires_user_input);
        assert!(r.resolved.is_none());
        assert!(!ConflictResolution::use_remote(None, "gone").requires_user_input);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConflictKind::SchemaChange.to_string(), "SchemaChange");
        assert_eq!(ResolutionStrategy::UseLocal.as_str(), "use_local");
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic conflict policy.
//!
//! # Decision table
//!
//! ```text
//! identical snapshots ─────────────────────────────► UseRemote
//!
//! DataModified
//!   timestamps ≥ 5 min apart ──────────────────────► newer side wins
//!   ≤ 2 differing fields that can't be merged ─────► Merge
//!   severity (differing keys / all keys) > 0.7 ────► Manual
//!   otherwise ─────────────────────────────────────► UseLocal
//!
//! RecordDeleted
//!   remote gone, local significant ────────────────► UseLocal (restore)
//!   remote gone, local not significant ────────────► UseRemote (delete)
//!   local gone, remote present ────────────────────► Manual
//!   both gone ─────────────────────────────────────► UseRemote
//!
//! VersionMismatch
//!   timestamps ≥ 5 min apart ──────────────────────► newer side wins
//!   timestamps closer than that ───────────────────► UseRemote
//!   a timestamp missing ───────────────────────────► Manual
//!
//! SchemaChange
//!   local migrates onto remote keys ───────────────► UseLocal (migrated)
//!   migration fails ───────────────────────────────► Manual
//! ```
//!
//! "Significant" means a non-blank user-content field or a modification
//! within 24 hours of `detected_at`. The resolver never reads the clock.

use serde_json::{Map, Value};

use super::merge::{merge_objects, unmergeable_fields};
use super::schema::{migrate, SCHEMA_VERSION_FIELD};
use super::timestamp::{extract_timestamp, is_timestamp_field};
use super::types::{ConflictKind, ConflictResolution, SyncConflict};

/// Timestamps closer than this are treated as concurrent edits.
pub const TIE_WINDOW_MS: i64 = 5 * 60 * 1000;
/// Above this share of differing keys a human has to decide.
pub const SEVERITY_THRESHOLD: f64 = 0.7;
/// At most this many differing fields may need a side picked for a merge.
pub const MAX_UNMERGEABLE_FIELDS: usize = 2;
/// A local record touched this recently survives a remote deletion.
pub const SIGNIFICANCE_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Fields holding user-authored content.
pub const CONTENT_FIELDS: [&str; 4] = ["content", "message", "notes", "description"];

/// Bookkeeping fields whose divergence alone is a version mismatch.
pub const VERSION_FIELDS: [&str; 5] = ["version", "_version", "revision", "_rev", "etag"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictResolver {
    tie_window_ms: i64,
    severity_threshold: f64,
    max_unmergeable_fields: usize,
    significance_window_ms: i64,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Which snapshot is newer, if it can be told.
enum Recency {
    Local { gap_ms: i64 },
    Remote { gap_ms: i64 },
    Tie { gap_ms: i64 },
    Unknown,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tie_window_ms: TIE_WINDOW_MS,
            severity_threshold: SEVERITY_THRESHOLD,
            max_unmergeable_fields: MAX_UNMERGEABLE_FIELDS,
            significance_window_ms: SIGNIFICANCE_WINDOW_MS,
        }
    }

    /// Decide a conflict. Same input, same output.
    #[must_use]
    pub fn resolve(&self, conflict: &SyncConflict) -> ConflictResolution {
        if conflict.local == conflict.remote {
            return ConflictResolution::use_remote(
                conflict.remote.clone(),
                "local and remote snapshots are identical",
            );
        }

        match (conflict.kind, &conflict.local, &conflict.remote) {
            (ConflictKind::RecordDeleted, _, _) | (_, None, _) | (_, _, None) => {
                self.resolve_deleted(conflict)
            }
            (ConflictKind::DataModified, Some(local), Some(remote)) => {
                self.resolve_modified(local, remote)
            }
            (ConflictKind::VersionMismatch, Some(local), Some(remote)) => {
                self.resolve_version(local, remote)
            }
            (ConflictKind::SchemaChange, Some(local), Some(remote)) => {
                self.resolve_schema(local, remote)
            }
        }
    }

    /// Classify a divergence when the remote did not say what kind it is.
    #[must_use]
    pub fn classify(local: Option<&Value>, remote: Option<&Value>) -> ConflictKind {
        let (local, remote) = match (
            local.filter(|v| !v.is_null()),
            remote.filter(|v| !v.is_null()),
        ) {
            (Some(l), Some(r)) => (l, r),
            _ => return ConflictKind::RecordDeleted,
        };
        let (Some(local), Some(remote)) = (local.as_object(), remote.as_object()) else {
            return ConflictKind::DataModified;
        };

        if local.get(SCHEMA_VERSION_FIELD) != remote.get(SCHEMA_VERSION_FIELD) {
            return ConflictKind::SchemaChange;
        }

        let differing = differing_keys(local, remote);
        if !differing.is_empty()
            && differing
                .iter()
                .all(|k| VERSION_FIELDS.contains(&k.as_str()) || is_timestamp_field(k))
        {
            return ConflictKind::VersionMismatch;
        }
        ConflictKind::DataModified
    }

    fn resolve_modified(&self, local: &Value, remote: &Value) -> ConflictResolution {
        let (Some(local_map), Some(remote_map)) = (local.as_object(), remote.as_object()) else {
            return ConflictResolution::manual("snapshots are not records; fields cannot be compared");
        };

        match self.recency(local, remote) {
            Recency::Local { gap_ms } => {
                return ConflictResolution::use_local(
                    Some(local.clone()),
                    format!("local change is newer by {}s", gap_ms / 1000),
                );
            }
            Recency::Remote { gap_ms } => {
                return ConflictResolution::use_remote(
                    Some(remote.clone()),
                    format!("remote change is newer by {}s", gap_ms / 1000),
                );
            }
            Recency::Tie { .. } | Recency::Unknown => {}
        }

        let unmergeable = unmergeable_fields(local_map, remote_map);
        if unmergeable.len() <= self.max_unmergeable_fields {
            let merged = merge_objects(local_map, remote_map);
            let rationale = if unmergeable.is_empty() {
                "all differing fields merge cleanly".to_string()
            } else {
                format!("merged; remote kept for {}", unmergeable.join(", "))
            };
            return ConflictResolution::merge(Value::Object(merged), rationale);
        }

        let severity = severity(local_map, remote_map);
        if severity > self.severity_threshold {
            ConflictResolution::manual(format!(
                "severity {:.2} with {} conflicting fields ({}) and no decisive timestamp",
                severity,
                unmergeable.len(),
                unmergeable.join(", ")
            ))
        } else {
            ConflictResolution::use_local(
                Some(local.clone()),
                format!("severity {:.2}; keeping local edits", severity),
            )
        }
    }

    fn resolve_deleted(&self, conflict: &SyncConflict) -> ConflictResolution {
        match (&conflict.local, &conflict.remote) {
            (Some(local), None) => {
                let reasons = self.significance(local, conflict.detected_at);
                if reasons.is_empty() {
                    ConflictResolution::use_remote(
                        None,
                        "deleted remotely; local copy has no recent or user-authored content",
                    )
                } else {
                    ConflictResolution::use_local(
                        Some(local.clone()),
                        format!("restoring remotely deleted record: {}", reasons.join("; ")),
                    )
                }
            }
            (None, Some(_)) => ConflictResolution::manual(
                "deleted locally while the remote record changed; intent is ambiguous",
            ),
            (None, None) => ConflictResolution::use_remote(None, "deleted on both sides"),
            (Some(local), Some(remote)) => self.resolve_modified(local, remote),
        }
    }

    fn resolve_version(&self, local: &Value, remote: &Value) -> ConflictResolution {
        match self.recency(local, remote) {
            Recency::Local { gap_ms } => ConflictResolution::use_local(
                Some(local.clone()),
                format!("local version is newer by {}s", gap_ms / 1000),
            ),
            Recency::Remote { gap_ms } => ConflictResolution::use_remote(
                Some(remote.clone()),
                format!("remote version is newer by {}s", gap_ms / 1000),
            ),
            Recency::Tie { gap_ms } => ConflictResolution::use_remote(
                Some(remote.clone()),
                format!("versions {}s apart; remote breaks the tie", gap_ms / 1000),
            ),
            Recency::Unknown => {
                ConflictResolution::manual("version mismatch without usable timestamps")
            }
        }
    }

    fn resolve_schema(&self, local: &Value, remote: &Value) -> ConflictResolution {
        let (Some(local_map), Some(remote_map)) = (local.as_object(), remote.as_object()) else {
            return ConflictResolution::manual("schema change on a non-record snapshot");
        };
        match migrate(local_map, remote_map) {
            Ok(migrated) => ConflictResolution::use_local(
                Some(Value::Object(migrated)),
                "local snapshot migrated to the remote schema",
            ),
            Err(e) => ConflictResolution::manual(e.to_string()),
        }
    }

    fn recency(&self, local: &Value, remote: &Value) -> Recency {
        let (Some(l), Some(r)) = (extract_timestamp(local), extract_timestamp(remote)) else {
            return Recency::Unknown;
        };
        let gap_ms = l.abs_diff(r).min(i64::MAX as u64) as i64;
        if gap_ms < self.tie_window_ms {
            Recency::Tie { gap_ms }
        } else if l > r {
            Recency::Local { gap_ms }
        } else {
            Recency::Remote { gap_ms }
        }
    }

    /// Why a local record is worth keeping; empty when it is not.
    fn significance(&self, local: &Value, now: i64) -> Vec<String> {
        let mut reasons = Vec::new();
        if let Some(fields) = local.as_object() {
            for field in CONTENT_FIELDS {
                if fields.get(field).is_some_and(has_content) {
                    reasons.push(format!("non-empty {}", field));
                }
            }
        }
        if let Some(ts) = extract_timestamp(local) {
            let age_ms = now.saturating_sub(ts);
            if age_ms < self.significance_window_ms {
                reasons.push(format!("modified {} min before the conflict", age_ms.max(0) / 60_000));
            }
        }
        reasons
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn differing_keys(local: &Map<String, Value>, remote: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = local
        .iter()
        .filter(|(k, v)| remote.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(remote.keys().filter(|k| !local.contains_key(*k)).cloned());
    keys
}

/// Share of keys, across both snapshots, whose values differ.
fn severity(local: &Map<String, Value>, remote: &Map<String, Value>) -> f64 {
    let total = local.len() + remote.keys().filter(|k| !local.contains_key(*k)).count();
    if total == 0 {
        return 0.0;
    }
    differing_keys(local, remote).len() as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::types::ResolutionStrategy;
    use serde_json::json;

    const NOW: i64 = 1_800_000_000_000;
    const MINUTE: i64 = 60_000;

    fn conflict(kind: ConflictKind, local: Option<Value>, remote: Option<Value>) -> SyncConflict {
        SyncConflict::new("notes", "n-1", kind, local, remote, NOW)
    }

    fn resolve(kind: ConflictKind, local: Option<Value>, remote: Option<Value>) -> ConflictResolution {
        ConflictResolver::new().resolve(&conflict(kind, local, remote))
    }

    #[test]
    fn test_identical_snapshots_use_remote() {
        let snap = json!({"title": "oil change", "updated_at": 5});
        for kind in [
            ConflictKind::DataModified,
            ConflictKind::RecordDeleted,
            ConflictKind::VersionMismatch,
            ConflictKind::SchemaChange,
        ] {
            let r = resolve(kind, Some(snap.clone()), Some(snap.clone()));
            assert_eq!(r.strategy, ResolutionStrategy::UseRemote);
            assert!(!r.requires_user_input);
        }
    }

    #[test]
    fn test_counter_and_timestamp_merge() {
        let r = resolve(
            ConflictKind::DataModified,
            Some(json!({"count": 5, "updated_at": 100})),
            Some(json!({"count": 7, "updated_at": 90})),
        );
        assert_eq!(r.strategy, ResolutionStrategy::Merge);
        assert_eq!(r.resolved, Some(json!({"count": 7, "updated_at": 100})));
    }

    #[test]
    fn test_newer_side_wins_when_far_apart() {
        let local = json!({"a": "x", "b": "y", "c": "z", "updated_at": NOW});
        let remote = json!({"a": "1", "b": "2", "c": "3", "updated_at": NOW - 6 * MINUTE});

        let r = resolve(ConflictKind::DataModified, Some(local.clone()), Some(remote.clone()));
        assert_eq!(r.strategy, ResolutionStrategy::UseLocal);
        assert_eq!(r.resolved, Some(local.clone()));

        let r = resolve(ConflictKind::DataModified, Some(remote), Some(local.clone()));
        assert_eq!(r.strategy, ResolutionStrategy::UseRemote);
        assert_eq!(r.resolved, Some(local));
    }

    #[test]
    fn test_high_severity_goes_manual() {
        let r = resolve(
            ConflictKind::DataModified,
            Some(json!({"a": "1", "b": "2", "c": "3", "d": "4", "e": "same"})),
            Some(json!({"a": "w", "b": "x", "c": "y", "d": "z", "e": "same"})),
        );
        assert_eq!(r.strategy, ResolutionStrategy::Manual);
        assert!(r.requires_user_input);
        assert!(r.rationale.contains("0.80"));
    }

    #[test]
    fn test_low_severity_keeps_local() {
        // 3 unmergeable of 10 keys, timestamps within the tie window
        let mut local = json!({"a": "1", "b": "2", "c": "3", "updated_at": NOW});
        let mut remote = json!({"a": "x", "b": "y", "c": "z", "updated_at": NOW - MINUTE});
        for i in 0..6 {
            local[format!("k{}", i)] = json!(i);
            remote[format!("k{}", i)] = json!(i);
        }
        let r = resolve(ConflictKind::DataModified, Some(local.clone()), Some(remote));
        assert_eq!(r.strategy, ResolutionStrategy::UseLocal);
        assert_eq!(r.resolved, Some(local));
    }

    #[test]
    fn test_deleted_remotely_restores_significant_local() {
        let r = resolve(
            ConflictKind::RecordDeleted,
            Some(json!({"notes": "urgent fix", "modified_at": NOW - 60 * MINUTE})),
            None,
        );
        assert_eq!(r.strategy, ResolutionStrategy::UseLocal);
        assert!(r.rationale.contains("notes"));
        assert!(r.rationale.contains("60 min"));
    }

    #[test]
    fn test_deleted_remotely_accepts_stale_local() {
        let r = resolve(
            ConflictKind::RecordDeleted,
            Some(json!({"notes": "  ", "modified_at": NOW - 48 * 60 * MINUTE})),
            None,
        );
        assert_eq!(r.strategy, ResolutionStrategy::UseRemote);
        assert_eq!(r.resolved, None);
    }

    #[test]
    fn test_deleted_locally_is_manual() {
        let r = resolve(ConflictKind::RecordDeleted, None, Some(json!({"notes": "x"})));
        assert_eq!(r.strategy, ResolutionStrategy::Manual);

        let r = resolve(ConflictKind::RecordDeleted, None, None);
        assert_eq!(r.strategy, ResolutionStrategy::UseRemote);
    }

    #[test]
    fn test_version_mismatch() {
        let local = json!({"version": 3, "updated_at": NOW});
        let close = json!({"version": 4, "updated_at": NOW - MINUTE});
        let far = json!({"version": 4, "updated_at": NOW + 10 * MINUTE});

        let r = resolve(ConflictKind::VersionMismatch, Some(local.clone()), Some(close.clone()));
        assert_eq!(r.strategy, ResolutionStrategy::UseRemote);
        assert_eq!(r.resolved, Some(close));

        let r = resolve(ConflictKind::VersionMismatch, Some(local), Some(far));
        assert_eq!(r.strategy, ResolutionStrategy::UseRemote);

        let r = resolve(
            ConflictKind::VersionMismatch,
            Some(json!({"version": 3})),
            Some(json!({"version": 4})),
        );
        assert_eq!(r.strategy, ResolutionStrategy::Manual);
    }

    #[test]
    fn test_schema_change_migrates_local() {
        let r = resolve(
            ConflictKind::SchemaChange,
            Some(json!({"schema_version": 1, "mileage": "900", "colour": "red"})),
            Some(json!({"schema_version": 2, "mileage": 0, "color": "blue"})),
        );
        assert_eq!(r.strategy, ResolutionStrategy::UseLocal);
        assert_eq!(
            r.resolved,
            Some(json!({
                "schema_version": 2,
                "mileage": 900,
                "color": "blue",
                "_unmapped": {"colour": "red"}
            }))
        );
    }

    #[test]
    fn test_schema_migration_failure_is_manual() {
        let r = resolve(
            ConflictKind::SchemaChange,
            Some(json!({"mileage": [1, 2]})),
            Some(json!({"mileage": 0})),
        );
        assert_eq!(r.strategy, ResolutionStrategy::Manual);
        assert!(r.rationale.contains("mileage"));
    }

    #[test]
    fn test_non_record_snapshots_are_manual() {
        let r = resolve(ConflictKind::DataModified, Some(json!([1])), Some(json!([2])));
        assert_eq!(r.strategy, ResolutionStrategy::Manual);
    }

    #[test]
    fn test_classify() {
        let a = json!({"title": "x", "version": 1, "schema_version": 1});
        assert_eq!(ConflictResolver::classify(Some(&a), None), ConflictKind::RecordDeleted);
        assert_eq!(ConflictResolver::classify(None, Some(&a)), ConflictKind::RecordDeleted);
        assert_eq!(
            ConflictResolver::classify(Some(&a), Some(&json!({"title": "x", "version": 2, "schema_version": 1}))),
            ConflictKind::VersionMismatch
        );
        assert_eq!(
            ConflictResolver::classify(Some(&a), Some(&json!({"title": "y", "version": 2, "schema_version": 1}))),
            ConflictKind::DataModified
        );
        assert_eq!(
            ConflictResolver::classify(Some(&a), Some(&json!({"title": "x", "version": 1, "schema_version": 2}))),
            ConflictKind::SchemaChange
        );
    }

    #[test]
    fn test_severity() {
        let l = json!({"a": 1, "b": 2}).as_object().cloned().unwrap();
        let r = json!({"a": 1, "c": 3}).as_object().cloned().unwrap();
        assert!((severity(&l, &r) - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(severity(&Map::new(), &Map::new()), 0.0);
    }
}

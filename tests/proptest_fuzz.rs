//! Property-based tests (fuzzing) for resolver and queue invariants.
//!
//! Uses proptest to generate random records and mutations and verify the
//! conflict policy and drain order hold for all of them, and that malformed
//! input only ever produces clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use offline_sync::conflict::merge::merge_objects;
use offline_sync::{
    ConflictKind, ConflictResolver, InMemoryStore, NewOperation, OpKind, Payload, ResolutionStrategy,
    SyncConflict, SyncQueue,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Arbitrary JSON values, nested a few levels deep
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Flat records with plain field names (never timestamp-named)
fn record_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::hash_map(
        "[a-z]{1,8}",
        prop_oneof![
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z ]{0,12}".prop_map(Value::String),
            any::<bool>().prop_map(Value::Bool),
        ],
        0..8,
    )
    .prop_map(|m| m.into_iter().collect())
}

fn conflict_kind_strategy() -> impl Strategy<Value = ConflictKind> {
    prop_oneof![
        Just(ConflictKind::DataModified),
        Just(ConflictKind::RecordDeleted),
        Just(ConflictKind::VersionMismatch),
        Just(ConflictKind::SchemaChange),
    ]
}

fn conflict(kind: ConflictKind, local: Option<Value>, remote: Option<Value>) -> SyncConflict {
    SyncConflict::new("records", "r-1", kind, local, remote, 1_700_000_000_000)
}

fn as_set(value: &Value) -> HashSet<String> {
    value
        .as_array()
        .map(|items| items.iter().map(Value::to_string).collect())
        .unwrap_or_default()
}

// =============================================================================
// Resolver Properties
// =============================================================================

proptest! {
    /// Identical snapshots are never escalated to a human
    #[test]
    fn prop_identical_snapshots_never_manual(
        value in arbitrary_json_strategy(),
        kind in conflict_kind_strategy(),
    ) {
        let resolution = ConflictResolver::new().resolve(&conflict(kind, Some(value.clone()), Some(value)));
        prop_assert_eq!(resolution.strategy, ResolutionStrategy::UseRemote);
        prop_assert!(!resolution.requires_user_input);
    }

    /// Same input, same decision; arbitrary shapes never panic
    #[test]
    fn prop_resolution_is_deterministic(
        local in prop::option::of(arbitrary_json_strategy()),
        remote in prop::option::of(arbitrary_json_strategy()),
        kind in conflict_kind_strategy(),
    ) {
        let resolver = ConflictResolver::new();
        let c = conflict(kind, local, remote);
        let first = resolver.resolve(&c);
        let second = resolver.resolve(&c);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.requires_user_input, first.strategy == ResolutionStrategy::Manual);
        if first.strategy == ResolutionStrategy::Manual {
            prop_assert!(first.resolved.is_none());
        }
    }

    /// A newer side by at least five minutes always wins a data conflict
    #[test]
    fn prop_timestamp_monotonicity(
        mut local in record_strategy(),
        mut remote in record_strategy(),
        base in 1_000_000_000_000i64..2_000_000_000_000,
        gap in 300_000i64..10_000_000_000,
        local_newer in any::<bool>(),
    ) {
        let (local_ts, remote_ts) = if local_newer { (base + gap, base) } else { (base, base + gap) };
        local.insert("updated_at".into(), json!(local_ts));
        remote.insert("updated_at".into(), json!(remote_ts));

        let resolution = ConflictResolver::new().resolve(&conflict(
            ConflictKind::DataModified,
            Some(Value::Object(local)),
            Some(Value::Object(remote)),
        ));
        let expected = if local_newer { ResolutionStrategy::UseLocal } else { ResolutionStrategy::UseRemote };
        prop_assert_eq!(resolution.strategy, expected);
    }

    /// List union does not depend on which side is local
    #[test]
    fn prop_list_merge_commutes_as_set(
        a in prop::collection::vec(0u8..20, 0..10),
        b in prop::collection::vec(0u8..20, 0..10),
    ) {
        let left: Map<String, Value> = [("tags".to_string(), json!(a))].into_iter().collect();
        let right: Map<String, Value> = [("tags".to_string(), json!(b))].into_iter().collect();

        let ab = merge_objects(&left, &right);
        let ba = merge_objects(&right, &left);
        prop_assert_eq!(as_set(&ab["tags"]), as_set(&ba["tags"]));

        let expected: HashSet<String> = a.iter().chain(b.iter()).map(|n| n.to_string()).collect();
        prop_assert_eq!(as_set(&ab["tags"]), expected);
    }

    /// Merging never drops a field present on either side
    #[test]
    fn prop_merge_keeps_every_key(local in record_strategy(), remote in record_strategy()) {
        let merged = merge_objects(&local, &remote);
        for key in local.keys().chain(remote.keys()) {
            prop_assert!(merged.contains_key(key));
        }
        prop_assert!(merged.len() <= local.len() + remote.len());
    }

    /// Payload validation never panics on arbitrary bytes
    #[test]
    fn fuzz_payload_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2000)) {
        if let Ok(payload) = Payload::from_bytes(bytes.clone()) {
            prop_assert_eq!(payload.as_bytes(), bytes.as_slice());
        }
    }

    /// Equal bytes, equal hash
    #[test]
    fn prop_content_hash_follows_bytes(value in arbitrary_json_strategy()) {
        let a = Payload::from_value(&value);
        let b = Payload::from_bytes(a.as_bytes().to_vec()).unwrap();
        prop_assert_eq!(a.content_hash(), b.content_hash());
        prop_assert_eq!(a.content_hash().len(), 64);
    }
}

// =============================================================================
// Queue Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Drain order is non-increasing in priority and FIFO within a tier
    #[test]
    fn prop_queue_drain_order(priorities in prop::collection::vec(-5i32..10, 1..40), limit in 1usize..50) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let batch = runtime.block_on(async {
            let queue = SyncQueue::new(
                Arc::new(InMemoryStore::new()),
                3,
                Duration::from_secs(30),
                Duration::from_secs(900),
            );
            for (i, priority) in priorities.iter().enumerate() {
                queue
                    .enqueue(NewOperation {
                        op_kind: OpKind::Create,
                        collection: "jobs".into(),
                        record_id: format!("j-{}", i),
                        payload: Some(Payload::from_value(&json!({"i": i}))),
                        priority: *priority,
                        base_hash: None,
                    })
                    .await
                    .unwrap();
            }
            queue.dequeue_batch(limit, None).await.unwrap()
        });

        prop_assert_eq!(batch.len(), limit.min(priorities.len()));
        for pair in batch.windows(2) {
            prop_assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                prop_assert!(pair[0].created_at <= pair[1].created_at);
                prop_assert!(pair[0].id < pair[1].id);
            }
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field-level merge of two JSON objects.
//!
//! | local / remote          | merged value                          |
//! |-------------------------|---------------------------------------|
//! | timestamp-named         | later of the two                      |
//! | counter-named numbers   | max                                   |
//! | other numbers           | mean                                  |
//! | lists                   | local order, then remote-only items   |
//! | objects                 | recursive merge                       |
//! | strings                 | non-empty side, remote if both set    |
//! | null on one side        | the other side                        |
//! | anything else           | remote                                |
//!
//! Keys present on only one side are carried over unchanged.

use serde_json::{Map, Number, Value};

use super::timestamp::{is_timestamp_field, parse_timestamp};

/// Whether a field name holds a monotonically growing count.
#[must_use]
pub fn is_counter_field(name: &str) -> bool {
    matches!(name, "count" | "total") || name.ends_with("_count") || name.ends_with("_total")
}

/// Whether two differing values of `field` can be combined without
/// picking a side.
#[must_use]
pub fn is_mergeable(field: &str, local: &Value, remote: &Value) -> bool {
    if local == remote {
        return true;
    }
    if is_timestamp_field(field)
        && parse_timestamp(local).is_some()
        && parse_timestamp(remote).is_some()
    {
        return true;
    }
    match (local, remote) {
        (Value::Null, _) | (_, Value::Null) => true,
        (Value::Number(_), Value::Number(_)) => true,
        (Value::Array(_), Value::Array(_)) => true,
        (Value::Object(_), Value::Object(_)) => true,
        (Value::String(l), Value::String(r)) => l.is_empty() || r.is_empty(),
        _ => false,
    }
}

/// Top-level fields whose values differ and cannot be merged.
#[must_use]
pub fn unmergeable_fields(local: &Map<String, Value>, remote: &Map<String, Value>) -> Vec<String> {
    local
        .iter()
        .filter_map(|(key, l)| {
            let r = remote.get(key)?;
            (!is_mergeable(key, l, r)).then(|| key.clone())
        })
        .collect()
}

#[must_use]
pub fn merge_objects(local: &Map<String, Value>, remote: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = Map::new();
    for (key, l) in local {
        let value = match remote.get(key) {
            Some(r) => merge_field(key, l, r),
            None => l.clone(),
        };
        merged.insert(key.clone(), value);
    }
    for (key, r) in remote {
        if !merged.contains_key(key) {
            merged.insert(key.clone(), r.clone());
        }
    }
    merged
}

fn merge_field(name: &str, local: &Value, remote: &Value) -> Value {
    if local == remote {
        return local.clone();
    }

    if is_timestamp_field(name) {
        if let (Some(l), Some(r)) = (parse_timestamp(local), parse_timestamp(remote)) {
            return if l >= r { local.clone() } else { remote.clone() };
        }
    }

    match (local, remote) {
        (Value::Number(l), Value::Number(r)) if is_counter_field(name) => max_number(l, r),
        (Value::Number(l), Value::Number(r)) => mean_number(l, r),
        (Value::Array(l), Value::Array(r)) => Value::Array(union_lists(l, r)),
        (Value::Object(l), Value::Object(r)) => Value::Object(merge_objects(l, r)),
        (Value::String(l), Value::String(r)) => {
            if r.is_empty() && !l.is_empty() {
                local.clone()
            } else {
                Value::String(r.clone())
            }
        }
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        _ => remote.clone(),
    }
}

fn max_number(l: &Number, r: &Number) -> Value {
    match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => Value::from(a.max(b)),
        _ => {
            let a = l.as_f64().unwrap_or(f64::MIN);
            let b = r.as_f64().unwrap_or(f64::MIN);
            Value::Number(if a >= b { l.clone() } else { r.clone() })
        }
    }
}

fn mean_number(l: &Number, r: &Number) -> Value {
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            if sum % 2 == 0 {
                return Value::from(sum / 2);
            }
        }
    }
    let a = l.as_f64().unwrap_or(0.0);
    let b = r.as_f64().unwrap_or(0.0);
    Number::from_f64((a + b) / 2.0).map_or(Value::Null, Value::Number)
}

fn union_lists(local: &[Value], remote: &[Value]) -> Vec<Value> {
    let mut merged = local.to_vec();
    for item in remote {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Moving a local snapshot onto the remote's schema.
//!
//! The remote snapshot's keys are the new schema. Each local value is
//! coerced to the type the remote uses for that key; keys the new schema
//! no longer has are parked under [`UNMAPPED_KEY`] so no user data is lost.

use serde_json::{Map, Number, Value};

use super::types::ConflictError;

/// Side channel for local fields the new schema dropped.
pub const UNMAPPED_KEY: &str = "_unmapped";

/// Key whose change marks a schema change. Always taken from the remote.
pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

pub fn migrate(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
) -> Result<Map<String, Value>, ConflictError> {
    let mut migrated = Map::new();
    for (key, target) in remote {
        if key == UNMAPPED_KEY {
            continue;
        }
        let value = match local.get(key) {
            Some(value) if key != SCHEMA_VERSION_FIELD => coerce(key, value, target)?,
            _ => target.clone(),
        };
        migrated.insert(key.clone(), value);
    }

    let mut unmapped = match local.get(UNMAPPED_KEY) {
        Some(Value::Object(previous)) => previous.clone(),
        _ => Map::new(),
    };
    for (key, value) in local {
        if key != UNMAPPED_KEY && !remote.contains_key(key) {
            unmapped.insert(key.clone(), value.clone());
        }
    }
    if !unmapped.is_empty() {
        migrated.insert(UNMAPPED_KEY.to_string(), Value::Object(unmapped));
    }
    Ok(migrated)
}

/// Convert `value` to the JSON type of `target`.
fn coerce(field: &str, value: &Value, target: &Value) -> Result<Value, ConflictError> {
    let fail = |reason: String| ConflictError::SchemaMigration {
        field: field.to_string(),
        reason,
    };

    match (value, target) {
        (Value::Null, _) | (_, Value::Null) => Ok(value.clone()),
        (Value::Bool(_), Value::Bool(_))
        | (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Array(_), Value::Array(_))
        | (Value::Object(_), Value::Object(_)) => Ok(value.clone()),

        (Value::Number(n), Value::String(_)) => Ok(Value::String(n.to_string())),
        (Value::Bool(b), Value::String(_)) => Ok(Value::String(b.to_string())),

        (Value::String(s), Value::Number(_)) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| fail(format!("'{}' is not a number", s)))
        }
        (Value::String(s), Value::Bool(_)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(fail(format!("'{}' is not a boolean", other))),
        },

        _ => Err(fail(format!(
            "cannot convert {} to {}",
            type_name(value),
            type_name(target)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_migrates_into_remote_keys() {
        let local = obj(json!({"mileage": "12500", "vin": "WVW1", "nickname": "Blue"}));
        let remote = obj(json!({"mileage": 0, "vin": "", "trim": "GTI", "schema_version": 2}));

        let out = migrate(&local, &remote).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({
                "mileage": 12500,
                "vin": "WVW1",
                "trim": "GTI",
                "schema_version": 2,
                "_unmapped": {"nickname": "Blue"}
            })
        );
    }

    #[test]
    fn test_coercions() {
        let local = obj(json!({"a": 3, "b": "TRUE", "c": false, "d": null, "e": "2.5"}));
        let remote = obj(json!({"a": "", "b": false, "c": "", "d": 1, "e": 0}));
        let out = Value::Object(migrate(&local, &remote).unwrap());
        assert_eq!(out, json!({"a": "3", "b": true, "c": "false", "d": null, "e": 2.5}));
    }

    #[test]
    fn test_unconvertible_value_fails() {
        let local = obj(json!({"tags": ["a"]}));
        let remote = obj(json!({"tags": "a,b"}));
        let err = migrate(&local, &remote).unwrap_err();
        assert!(err.to_string().contains("tags"));

        let local = obj(json!({"mileage": "lots"}));
        let remote = obj(json!({"mileage": 1}));
        assert!(matches!(migrate(&local, &remote), Err(ConflictError::SchemaMigration { .. })));
    }

    #[test]
    fn test_previous_unmapped_fields_survive() {
        let local = obj(json!({"x": 1, "_unmapped": {"old": true}}));
        let remote = obj(json!({"y": 2}));
        let out = Value::Object(migrate(&local, &remote).unwrap());
        assert_eq!(out, json!({"y": 2, "_unmapped": {"old": true, "x": 1}}));
    }
}

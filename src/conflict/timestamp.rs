// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Timestamp extraction from schemaless snapshots.
//!
//! Accepted forms, all normalized to epoch millis:
//! - JSON integer (or float, truncated)
//! - digit-only string
//! - RFC 3339 (`2026-03-01T10:00:00Z`, `...+02:00`)
//! - naive ISO-8601 date-time or date, taken as UTC

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Fields searched, in order, for a snapshot's modification time.
pub const TIMESTAMP_FIELDS: [&str; 5] = [
    "updated_at",
    "modified_at",
    "timestamp",
    "last_modified",
    "created_at",
];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Whether a field name holds a point in time.
#[must_use]
pub fn is_timestamp_field(name: &str) -> bool {
    TIMESTAMP_FIELDS.contains(&name) || name.ends_with("_at")
}

/// First parseable timestamp among [`TIMESTAMP_FIELDS`].
#[must_use]
pub fn extract_timestamp(snapshot: &Value) -> Option<i64> {
    let object = snapshot.as_object()?;
    TIMESTAMP_FIELDS
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(parse_timestamp)
}

#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().ok();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_and_digit_string() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000_000_i64)), Some(1_700_000_000_000));
        assert_eq!(parse_timestamp(&json!("1700000000000")), Some(1_700_000_000_000));
        assert_eq!(parse_timestamp(&json!(12.9)), Some(12));
    }

    #[test]
    fn test_iso_forms() {
        let utc = parse_timestamp(&json!("2026-03-01T10:00:00Z")).unwrap();
        assert_eq!(parse_timestamp(&json!("2026-03-01T12:00:00+02:00")), Some(utc));
        assert_eq!(parse_timestamp(&json!("2026-03-01T10:00:00")), Some(utc));
        assert_eq!(parse_timestamp(&json!("2026-03-01 10:00:00.000")), Some(utc));
        assert_eq!(
            parse_timestamp(&json!("2026-03-01")),
            Some(utc - 10 * 3_600_000)
        );
    }

    #[test]
    fn test_unparseable() {
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
        assert_eq!(parse_timestamp(&Value::Null), None);
    }

    #[test]
    fn test_extract_uses_field_order() {
        let snapshot = json!({"created_at": 1, "modified_at": "bogus", "updated_at": 5});
        assert_eq!(extract_timestamp(&snapshot), Some(5));

        // Unparseable fields are skipped, not fatal
        let snapshot = json!({"updated_at": "soon", "created_at": 7});
        assert_eq!(extract_timestamp(&snapshot), Some(7));

        assert_eq!(extract_timestamp(&json!({"name": "x"})), None);
        assert_eq!(extract_timestamp(&json!([1, 2])), None);
    }

    #[test]
    fn test_field_naming() {
        assert!(is_timestamp_field("updated_at"));
        assert!(is_timestamp_field("serviced_at"));
        assert!(is_timestamp_field("timestamp"));
        assert!(!is_timestamp_field("mileage"));
    }
}

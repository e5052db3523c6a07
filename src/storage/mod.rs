// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local persistence: the record cache and the queue's backing rows.
//!
//! - [`memory::InMemoryStore`]: DashMap cache + in-process queue, for tests
//!   and ephemeral sessions
//! - [`sql::SqlStore`]: SQLite file holding both, survives restarts

pub mod memory;
pub mod sql;
pub mod traits;

/// Current wall-clock time in epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

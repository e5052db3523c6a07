// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health scoring.
//!
//! The score starts at 1.0 and loses a bounded amount per concern, so one
//! noisy concern cannot hide the others:
//!
//! | Concern              | Per item | Cap |
//! |----------------------|----------|-----|
//! | pending              | 0.02     | 0.3 |
//! | retrying             | 0.05     | 0.2 |
//! | dead-lettered        | 0.1      | 0.3 |
//! | awaiting user        | 0.05     | 0.2 |
//! | offline              | 0.1      |     |
//! | last pass failed     | 0.2      |     |

use crate::error::SyncError;
use crate::queue::operation::QueueCounts;

use super::{SyncHealth, SyncOrchestrator};

const PENDING_PENALTY: (f64, f64) = (0.02, 0.3);
const RETRYING_PENALTY: (f64, f64) = (0.05, 0.2);
const DEAD_LETTER_PENALTY: (f64, f64) = (0.1, 0.3);
const AWAITING_USER_PENALTY: (f64, f64) = (0.05, 0.2);
const OFFLINE_PENALTY: f64 = 0.1;
const PASS_ERROR_PENALTY: f64 = 0.2;

fn bounded((per_item, cap): (f64, f64), count: usize) -> f64 {
    (per_item * count as f64).min(cap)
}

/// Score in [0, 1] for the given queue population and link state.
pub(crate) fn health_score(counts: &QueueCounts, online: bool, pass_failed: bool) -> f64 {
    let mut score = 1.0;
    score -= bounded(PENDING_PENALTY, counts.pending);
    score -= bounded(RETRYING_PENALTY, counts.retrying);
    score -= bounded(DEAD_LETTER_PENALTY, counts.dead_letter);
    score -= bounded(AWAITING_USER_PENALTY, counts.awaiting_user);
    if !online {
        score -= OFFLINE_PENALTY;
    }
    if pass_failed {
        score -= PASS_ERROR_PENALTY;
    }
    score.clamp(0.0, 1.0)
}

impl SyncOrchestrator {
    /// Snapshot of sync health, computed from the queue on each call.
    pub async fn health(&self) -> Result<SyncHealth, SyncError> {
        let counts = self.queue.counts().await?;
        let dead = self.queue.dead_letters().await?;
        let online = self.network_allowed();
        let connectivity = self.connectivity();
        let (last_success_at, last_error) = {
            let history = self.history.lock();
            (history.last_success_at, history.last_error.clone())
        };

        let mut issues = Vec::new();
        for op in &dead {
            issues.push(format!(
                "dead-lettered {} {}/{} (op {}): {}",
                op.op_kind,
                op.collection,
                op.record_id,
                op.id,
                op.last_error.as_deref().or(op.status.detail()).unwrap_or("unknown error")
            ));
        }
        if counts.awaiting_user > 0 {
            issues.push(format!("{} conflict(s) need a user decision", counts.awaiting_user));
        }
        if !online {
            if connectivity.is_online() {
                issues.push("waiting for Wi-Fi (sync is Wi-Fi only)".to_string());
            } else {
                issues.push("offline, changes are queued locally".to_string());
            }
        }
        if let Some(error) = &last_error {
            issues.push(format!("last sync pass failed: {}", error));
        }

        let score = health_score(&counts, online, last_error.is_some());
        crate::metrics::set_health_score(score);

        Ok(SyncHealth {
            score,
            pending: counts.pending,
            failed: counts.retrying,
            awaiting_user: counts.awaiting_user,
            dead_lettered: counts.dead_letter,
            last_success_at,
            online,
            connectivity,
            state: self.state(),
            issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_score() {
        assert_eq!(health_score(&QueueCounts::default(), true, false), 1.0);
    }

    #[test]
    fn test_penalties_are_capped() {
        let counts = QueueCounts { pending: 1_000, ..Default::default() };
        assert!((health_score(&counts, true, false) - 0.7).abs() < 1e-9);

        let everything = QueueCounts { pending: 1_000, retrying: 1_000, awaiting_user: 1_000, dead_letter: 1_000 };
        assert_eq!(health_score(&everything, false, true), 0.0);
    }

    #[test]
    fn test_score_degrades_monotonically() {
        let mut last = 1.0;
        for pending in 0..20 {
            let counts = QueueCounts { pending, retrying: pending / 2, ..Default::default() };
            let score = health_score(&counts, true, false);
            assert!(score <= last);
            last = score;
        }
    }

    #[test]
    fn test_offline_penalty() {
        let counts = QueueCounts::default();
        assert!((health_score(&counts, false, false) - 0.9).abs() < 1e-9);
    }
}

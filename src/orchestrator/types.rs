//! Public types for the sync orchestrator.

use crate::connectivity::Connectivity;

/// Orchestrator state.
///
/// `Idle` is initial and there is no terminal state. Use
/// [`super::SyncOrchestrator::state()`] to check the current state or
/// [`super::SyncOrchestrator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Online, nothing running
    Idle,
    /// A pass is draining the queue
    Syncing,
    /// No usable network; passes are not started
    WaitingForNetwork,
    /// A pass is applying a conflict resolution
    ResolvingConflicts,
    /// Paused by the host or backgrounded without background sync
    Paused,
    /// The last pass could not run; the next successful pass clears it
    Error,
}

impl SyncState {
    /// A pass is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Syncing | Self::ResolvingConflicts)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Syncing => write!(f, "Syncing"),
            Self::WaitingForNetwork => write!(f, "WaitingForNetwork"),
            Self::ResolvingConflicts => write!(f, "ResolvingConflicts"),
            Self::Paused => write!(f, "Paused"),
            Self::Error => write!(f, "Error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Drain everything pending, batch by batch
    Full,
    /// One bounded batch of high-priority operations
    Incremental,
}

impl PassKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Confirmed by the remote and removed from the queue
    pub synced: usize,
    /// Attempts that failed (network, rejection or local storage)
    pub failed: usize,
    /// Conflicts settled automatically
    pub conflicts_resolved: usize,
    /// Conflicts left for a human
    pub awaiting_user: usize,
    /// Operations that reached dead-letter during this pass
    pub dead_lettered: usize,
    /// Operations skipped because their retry backoff had not elapsed
    pub deferred: usize,
    pub errors: Vec<String>,
    /// Another pass was running and this one did not start
    pub already_in_progress: bool,
    /// The pass budget ran out before the queue was drained
    pub timed_out: bool,
}

impl SyncResult {
    pub(super) fn in_progress() -> Self {
        Self {
            already_in_progress: true,
            errors: vec!["sync already in progress".to_string()],
            ..Self::default()
        }
    }

    /// Operations the pass actually sent to the remote.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.synced + self.failed + self.conflicts_resolved + self.awaiting_user
    }

    /// Ran to completion with nothing failing or left for a human.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.already_in_progress && !self.timed_out && self.failed == 0 && self.awaiting_user == 0
    }
}

/// Live view of the pass in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncProgress {
    pub pass: Option<PassKind>,
    /// Operations expected in this pass
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// `collection/record_id` being applied
    pub current_operation: Option<String>,
    /// Epoch millis
    pub started_at: Option<i64>,
    pub elapsed_ms: u64,
    /// Extrapolated from the average time per operation so far
    pub estimated_remaining_ms: Option<u64>,
}

impl SyncProgress {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.pass.is_some()
    }

    /// Fraction done, 0.0 - 1.0.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            ((self.completed + self.failed) as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Health snapshot, computed on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncHealth {
    /// 1.0 = fully synced and online
    pub score: f64,
    pub pending: usize,
    /// Pending operations with at least one failed attempt
    pub failed: usize,
    pub awaiting_user: usize,
    pub dead_lettered: usize,
    /// Epoch millis of the last pass that completed with no failures
    pub last_success_at: Option<i64>,
    /// Syncing is allowed on the current link
    pub online: bool,
    pub connectivity: Connectivity,
    pub state: SyncState,
    /// Human-readable, most severe first
    pub issues: Vec<String>,
}

impl SyncHealth {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Notifications for UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged {
        from: SyncState,
        to: SyncState,
    },
    PassCompleted {
        pass: PassKind,
        result: SyncResult,
    },
    ConflictNeedsUser {
        op_id: u64,
        collection: String,
        record_id: String,
        rationale: String,
    },
    DeadLettered {
        op_id: u64,
        collection: String,
        record_id: String,
        reason: String,
    },
}

/// Bookkeeping across passes (internal use)
#[derive(Debug, Clone, Default)]
pub(super) struct PassHistory {
    pub last_success_at: Option<i64>,
    pub last_error: Option<String>,
    pub last_result: Option<SyncResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", SyncState::Idle), "Idle");
        assert_eq!(format!("{}", SyncState::WaitingForNetwork), "WaitingForNetwork");
        assert!(SyncState::ResolvingConflicts.is_busy());
        assert!(!SyncState::Paused.is_busy());
    }

    #[test]
    fn test_result_success() {
        let ok = SyncResult { synced: 4, deferred: 2, ..Default::default() };
        assert!(ok.is_success());
        assert_eq!(ok.attempted(), 4);

        let partial = SyncResult { synced: 3, failed: 1, ..Default::default() };
        assert!(!partial.is_success());

        let busy = SyncResult::in_progress();
        assert!(busy.already_in_progress);
        assert!(!busy.is_success());
    }

    #[test]
    fn test_progress_fraction() {
        let progress = SyncProgress { total: 4, completed: 2, failed: 1, ..Default::default() };
        assert!((progress.fraction() - 0.75).abs() < f64::EPSILON);
        assert_eq!(SyncProgress::default().fraction(), 0.0);
        assert!(!SyncProgress::default().is_active());
    }
}

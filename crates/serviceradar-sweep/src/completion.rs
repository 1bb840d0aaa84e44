//! Sweep Completion Coordinator (C7, spec §4.7).
//!
//! Tracks one `SweepCompletionStatus` per cycle behind a lock, written
//! by the engine as the cycle advances and read by the agent's RPC
//! handler as a cheap copy. The poller correlates this against its own
//! `target_sequence` to decide when it is safe to call `GetResults`.

use chrono::Utc;
use parking_lot::Mutex;
use serviceradar_core::{SweepCompletionStatus, SweepState};
use std::sync::Arc;

/// Shared, clonable handle onto the current cycle's completion status.
#[derive(Clone, Default)]
pub struct CompletionCoordinator {
    status: Arc<Mutex<SweepCompletionStatus>>,
}

impl CompletionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a new cycle, discarding the previous one's
    /// status (spec §4.7: exactly one status is live at a time).
    pub fn begin_cycle(&self, target_sequence: String, total_targets: u64) {
        let mut status = self.status.lock();
        *status = SweepCompletionStatus {
            state: SweepState::InProgress,
            target_sequence,
            total_targets,
            completed_targets: 0,
            completion_time: None,
            error_message: None,
        };
    }

    /// Advances `completed_targets` by `n`. Called once per drained
    /// probe outcome.
    pub fn record_progress(&self, n: u64) {
        let mut status = self.status.lock();
        status.completed_targets = status.completed_targets.saturating_add(n);
    }

    pub fn complete(&self) {
        let mut status = self.status.lock();
        status.state = SweepState::Completed;
        status.completion_time = Some(Utc::now());
    }

    pub fn fail(&self, message: String) {
        let mut status = self.status.lock();
        status.state = SweepState::Failed;
        status.completion_time = Some(Utc::now());
        status.error_message = Some(message);
    }

    /// A copy-on-read snapshot for the RPC layer (spec §3).
    pub fn snapshot(&self) -> SweepCompletionStatus {
        self.status.lock().clone()
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::task::TaskOutcome;

/// Scheduler operational counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks handed to the worker pool (including released successors).
    pub dispatched: u64,
    /// Tasks that had to wait behind a serial predecessor.
    pub held: u64,
    /// Completion handling invocations (body ran or cancelled before start).
    pub completed: u64,
    /// Completions where the body ran.
    pub ran: u64,
    /// Completions performed by the cancel path.
    pub cancelled: u64,
    /// Waiting tasks dropped by `cancel_all` before dispatch.
    pub discarded: u64,
    /// Bodies that returned an error or panicked, plus failed releases.
    pub faults: u64,
    /// `cancel_all` matches that had no cancellable handle.
    pub uncancellable: u64,
    /// Tasks currently in the ledger (filled in at snapshot time).
    pub tracked: usize,
    /// Wall-clock time of the last completion.
    pub last_completion: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_submit(&mut self) {
        self.submitted += 1;
    }

    pub fn record_dispatch(&mut self) {
        self.dispatched += 1;
    }

    pub fn record_held(&mut self) {
        self.held += 1;
    }

    /// Record a completion handling run or a discard.
    pub fn record_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Ran => {
                self.completed += 1;
                self.ran += 1;
            }
            TaskOutcome::Cancelled => {
                self.completed += 1;
                self.cancelled += 1;
            }
            TaskOutcome::Discarded => {
                self.discarded += 1;
                return;
            }
        }
        self.last_completion = Some(Utc::now());
    }

    pub fn record_fault(&mut self) {
        self.faults += 1;
    }

    pub fn record_uncancellable(&mut self) {
        self.uncancellable += 1;
    }
}

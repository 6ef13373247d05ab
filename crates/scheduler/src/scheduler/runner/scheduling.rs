use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::SchedulerError;
use crate::scheduler::ledger::Slot;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::task::{Task, TaskHandle, TaskOutcome, TaskShared};

use super::core::Inner;
use super::execution::Release;
use super::Scheduler;

/// What a `cancel_all` call found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CancelReport {
    /// Dispatched tasks stopped before their body started.
    pub cancelled: usize,
    /// Tasks dropped while waiting behind a serial predecessor.
    pub discarded: usize,
    /// Tasks whose body had already started; interrupted if requested.
    pub running: usize,
    /// Tasks dispatched without a cancellable handle; left to run.
    pub uncancellable: usize,
    /// Tasks caught mid-dispatch; cancelled once the handle is attached.
    pub deferred: usize,
}

impl CancelReport {
    /// Total tasks that matched the id.
    pub fn matched(&self) -> usize {
        self.cancelled + self.discarded + self.running + self.uncancellable + self.deferred
    }
}

impl Scheduler {
    /// Submit a task.
    ///
    /// The task is dispatched immediately unless another task with the same
    /// serial key is in flight, in which case it waits in the ledger. A
    /// positive delay on a pool without scheduling support is rejected
    /// before anything is recorded.
    pub fn submit(&self, task: Task) -> Result<TaskHandle, SchedulerError> {
        let inner = &self.inner;
        let Task { id, serial, delay, body } = task;
        if !delay.is_zero() && !inner.pool.supports_delayed_dispatch() {
            return Err(SchedulerError::SchedulingUnsupported { delay });
        }

        let shared = Arc::new(TaskShared::new(inner.next_seq(), id, serial, delay));
        let handle = TaskHandle::new(Arc::clone(&shared));
        inner.record(SchedulerMetrics::record_submit);

        let release = Release {
            shared: Arc::clone(&shared),
            body,
            delay,
        };
        if !shared.is_tracked() {
            inner.dispatch(release)?;
            return Ok(handle);
        }

        // Predecessor check and insertion happen under one lock acquisition.
        let release = {
            let mut ledger = inner.ledger();
            let blocked = shared
                .serial
                .as_deref()
                .is_some_and(|serial| ledger.has_dispatched(serial));
            if blocked {
                ledger.push(Arc::clone(&shared), Slot::Held(release.body));
                None
            } else {
                ledger.push(Arc::clone(&shared), Slot::Dispatching { cancel: None });
                Some(release)
            }
        };

        match release {
            Some(release) => inner.dispatch(release)?,
            None => {
                inner.record(SchedulerMetrics::record_held);
                debug!(
                    task = shared.seq,
                    serial = ?shared.serial,
                    "task held behind serial predecessor"
                );
            }
        }
        Ok(handle)
    }

    /// Cancel every tracked task whose id is exactly `id`.
    ///
    /// Tasks not yet started never run; tasks already running are only
    /// interrupted (cooperatively) when `interrupt_running` is set. An empty
    /// id matches nothing.
    pub fn cancel_all(&self, id: &str, interrupt_running: bool) -> CancelReport {
        let inner = &self.inner;
        let (mut sweep, releases) = {
            let mut ledger = inner.ledger();
            let sweep = ledger.cancel_matching(id, interrupt_running);
            let releases: Vec<Release> = sweep
                .claimed
                .iter()
                .filter_map(|shared| Inner::complete_locked(&mut ledger, shared))
                .collect();
            (sweep, releases)
        };
        // Cancelled bodies are dropped outside the ledger lock.
        drop(std::mem::take(&mut sweep.released));

        for shared in &sweep.claimed {
            inner.finish(shared, TaskOutcome::Cancelled);
        }
        for shared in &sweep.discarded {
            inner.finish(shared, TaskOutcome::Discarded);
        }
        for shared in &sweep.uncancellable {
            inner.warn_uncancellable(shared);
        }
        for release in releases {
            inner.release(release);
        }

        let report = CancelReport {
            cancelled: sweep.claimed.len(),
            discarded: sweep.discarded.len(),
            running: sweep.running.len(),
            uncancellable: sweep.uncancellable.len(),
            deferred: sweep.deferred.len(),
        };
        if report.matched() > 0 {
            debug!(id, interrupt_running, ?report, "cancel_all");
        }
        report
    }
}

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::cancel::CancellationToken;
use crate::error::SchedulerError;
use crate::pool::{DispatchHandle, Job};
use crate::scheduler::fault::{panic_message, FaultKind, TaskFault};
use crate::scheduler::ledger::{Attach, Ledger};
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::task::{TaskBody, TaskContext, TaskError, TaskOutcome, TaskShared};

use super::core::Inner;

/// A task on its way to the pool, with the delay to request.
pub(super) struct Release {
    pub(super) shared: Arc<TaskShared>,
    pub(super) body: TaskBody,
    pub(super) delay: Duration,
}

/// Remaining delay for a serial successor released at `now`.
///
/// Measured against the predecessor's deadline rather than the successor's
/// own, so a chain never waits longer than its head was asked to. A
/// successor submitted without a delay is dispatched at once.
pub(super) fn successor_delay(
    requested: Duration,
    predecessor_deadline: Instant,
    now: Instant,
) -> Duration {
    if requested.is_zero() {
        Duration::ZERO
    } else {
        predecessor_deadline.saturating_duration_since(now)
    }
}

impl Inner {
    /// Hand a task to the pool. Must be called without the ledger lock.
    ///
    /// If the pool refuses the job, the task is completed on the spot so any
    /// serial successors are still released, and the error is returned.
    pub(super) fn dispatch(self: &Arc<Self>, release: Release) -> Result<(), SchedulerError> {
        let Release { shared, body, delay } = release;
        let job = self.job(Arc::clone(&shared), body);
        let dispatched = if delay.is_zero() {
            Ok(self.pool.dispatch_now(job))
        } else {
            self.pool.dispatch_after(job, delay).map(Some)
        };

        match dispatched {
            Ok(handle) => {
                self.record(SchedulerMetrics::record_dispatch);
                debug!(
                    task = shared.seq,
                    serial = ?shared.serial,
                    delay_ms = delay.as_millis() as u64,
                    cancellable = handle.is_some(),
                    "task dispatched"
                );
                if shared.is_tracked() {
                    self.attach(&shared, handle);
                }
                Ok(())
            }
            Err(e) => {
                warn!(task = shared.seq, error = %e, "worker pool refused task");
                if shared.claim() {
                    self.complete(&shared, TaskOutcome::Cancelled);
                }
                Err(e)
            }
        }
    }

    fn job(self: &Arc<Self>, shared: Arc<TaskShared>, body: TaskBody) -> Job {
        let inner = Arc::clone(self);
        Box::new(move |interrupt: &CancellationToken| inner.run(shared, body, interrupt))
    }

    /// Pool-side entry point of every task.
    fn run(self: &Arc<Self>, shared: Arc<TaskShared>, body: TaskBody, interrupt: &CancellationToken) {
        if !shared.claim() {
            debug!(task = shared.seq, "task cancelled before start, skipping body");
            return;
        }

        trace!(task = shared.seq, serial = ?shared.serial, "task body started");
        let result = {
            let ctx = TaskContext::new(&shared, interrupt);
            panic::catch_unwind(AssertUnwindSafe(move || body(&ctx)))
        };

        self.complete(&shared, TaskOutcome::Ran);

        let kind = match result {
            Ok(Ok(())) => return,
            Ok(Err(TaskError::Interrupted)) => {
                debug!(task = shared.seq, "task body stopped after interrupt");
                return;
            }
            Ok(Err(e)) => FaultKind::Error(e),
            Err(payload) => FaultKind::Panic(panic_message(payload.as_ref())),
        };
        self.fault(&shared, kind);
    }

    /// Completion handling. Callers must have won `shared.claim()`.
    pub(super) fn complete(self: &Arc<Self>, shared: &Arc<TaskShared>, outcome: TaskOutcome) {
        let release = if shared.is_tracked() {
            let mut ledger = self.ledger();
            Self::complete_locked(&mut ledger, shared)
        } else {
            None
        };
        self.finish(shared, outcome);
        if let Some(release) = release {
            self.release(release);
        }
    }

    /// Ledger half of completion handling: drop the task and pick its serial
    /// successor, if any. The successor is marked as dispatching but not yet
    /// handed to the pool.
    pub(super) fn complete_locked(ledger: &mut Ledger, shared: &TaskShared) -> Option<Release> {
        ledger.remove(shared.seq);
        let serial = shared.serial.as_deref()?;
        let (next, body) = ledger.take_successor(serial)?;
        let delay = successor_delay(next.delay, shared.target_time, Instant::now());
        Some(Release { shared: next, body, delay })
    }

    /// Counted before waiters wake, so a woken waiter sees the metrics.
    pub(super) fn finish(&self, shared: &TaskShared, outcome: TaskOutcome) {
        self.record(|m| m.record_outcome(outcome));
        let first = shared.finish(outcome);
        debug_assert!(first, "task {} finished twice", shared.seq);
        debug!(task = shared.seq, ?outcome, "task finished");
    }

    /// Dispatch a serial successor picked by completion handling.
    pub(super) fn release(self: &Arc<Self>, release: Release) {
        let shared = Arc::clone(&release.shared);
        debug!(
            task = shared.seq,
            serial = ?shared.serial,
            delay_ms = release.delay.as_millis() as u64,
            "releasing serial successor"
        );
        if let Err(e) = self.dispatch(release) {
            self.fault(&shared, FaultKind::Dispatch(e));
        }
    }

    fn attach(self: &Arc<Self>, shared: &Arc<TaskShared>, handle: Option<DispatchHandle>) {
        let attached = self.ledger().attach(shared.seq, handle);
        match attached {
            Attach::Attached | Attach::Gone => {}
            Attach::CancelRequested {
                handle: Some(handle),
                interrupt,
            } => {
                handle.cancel(interrupt);
                if shared.claim() {
                    debug!(task = shared.seq, "applied cancellation requested during dispatch");
                    self.complete(shared, TaskOutcome::Cancelled);
                }
            }
            Attach::CancelRequested { handle: None, .. } => self.warn_uncancellable(shared),
        }
    }

    pub(super) fn warn_uncancellable(&self, shared: &TaskShared) {
        self.record(SchedulerMetrics::record_uncancellable);
        warn!(
            task = shared.seq,
            id = ?shared.id,
            "task cannot be cancelled, the worker pool gave no cancellable handle"
        );
    }

    pub(super) fn fault(&self, shared: &TaskShared, kind: FaultKind) {
        self.record(SchedulerMetrics::record_fault);
        let fault = TaskFault {
            seq: shared.seq,
            id: shared.id.clone(),
            serial: shared.serial.clone(),
            kind,
        };
        let handler = self.fault_handler();
        handler(&fault);
    }
}

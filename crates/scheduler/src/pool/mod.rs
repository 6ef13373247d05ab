//! Worker pool adapter.
//!
//! The scheduler never runs task bodies itself. It hands boxed [`Job`]s to a
//! [`WorkerPool`], which may support delayed dispatch and may return a
//! [`DispatchHandle`] that can stop the job before it starts.

mod rayon_pool;
mod timer;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::error::SchedulerError;

pub use rayon_pool::RayonPool;

/// A unit of work handed to a pool. The token is tripped when the job's
/// handle is cancelled with `interrupt_running = true`.
pub type Job = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Pool contract consumed by the scheduler.
pub trait WorkerPool: Send + Sync {
    /// Whether [`dispatch_after`](WorkerPool::dispatch_after) is available.
    fn supports_delayed_dispatch(&self) -> bool;

    /// Run `job` as soon as a worker is free. Fire-and-forget pools return
    /// `None`.
    fn dispatch_now(&self, job: Job) -> Option<DispatchHandle>;

    /// Run `job` once `delay` has elapsed.
    ///
    /// Pools without scheduling support return
    /// [`SchedulerError::SchedulingUnsupported`].
    fn dispatch_after(&self, job: Job, delay: Duration)
        -> Result<DispatchHandle, SchedulerError>;
}

/// Deadline `delay` after `now`, clamped to a far-future instant when the
/// sum does not fit in an `Instant`.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Default)]
struct HandleState {
    cancelled: AtomicBool,
    interrupt: CancellationToken,
    /// Taken by whichever of run or cancel gets there first.
    job: Mutex<Option<Job>>,
}

/// Cancellable handle for a dispatched job.
///
/// The handle owns the job until it runs. Cancelling before the job starts
/// drops it at once and prevents it from ever running. Cancelling afterwards
/// can only interrupt it cooperatively.
#[derive(Clone)]
pub struct DispatchHandle {
    state: Arc<HandleState>,
}

impl DispatchHandle {
    pub fn new(job: Job) -> Self {
        Self {
            state: Arc::new(HandleState {
                job: Mutex::new(Some(job)),
                ..HandleState::default()
            }),
        }
    }

    /// Request cancellation. With `interrupt_running`, a job that has
    /// already started sees its interrupt token tripped. A job that has not
    /// started is dropped here.
    pub fn cancel(&self, interrupt_running: bool) {
        drop(self.cancel_and_take(interrupt_running));
    }

    /// Like [`cancel`](Self::cancel), but hands the unstarted job back so the
    /// caller can drop it outside its own locks.
    pub(crate) fn cancel_and_take(&self, interrupt_running: bool) -> Option<Job> {
        self.state.cancelled.store(true, Ordering::Release);
        if interrupt_running {
            self.state.interrupt.cancel();
        }
        self.take_job()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Whether the job is still waiting to run.
    pub fn is_pending(&self) -> bool {
        self.state
            .job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run the job unless this handle was cancelled first. Pools call this
    /// from the worker thread.
    pub fn run(&self) {
        if self.is_cancelled() {
            return;
        }
        if let Some(job) = self.take_job() {
            job(&self.state.interrupt);
        }
    }

    fn take_job(&self) -> Option<Job> {
        self.state
            .job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("cancelled", &self.is_cancelled())
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Box::new(move |_token: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn handle_runs_job_when_not_cancelled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = DispatchHandle::new(counting_job(&counter));
        assert!(handle.is_pending());
        handle.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!handle.is_pending());

        // a second run finds nothing to do
        handle.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_handle_skips_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = DispatchHandle::new(counting_job(&counter));
        handle.cancel(false);
        handle.run();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn cancel_drops_job_and_its_captures() {
        let captured = Arc::new(());
        let in_job = Arc::clone(&captured);
        let handle = DispatchHandle::new(Box::new(move |_token: &CancellationToken| {
            let _keep = &in_job;
        }));
        assert_eq!(Arc::strong_count(&captured), 2);

        handle.cancel(true);
        assert_eq!(Arc::strong_count(&captured), 1);
        assert!(!handle.is_pending());
    }

    #[test]
    fn interrupt_reaches_running_job() {
        let observed = Arc::new(AtomicBool::new(false));
        let observed_in_job = Arc::clone(&observed);
        let canceller: Arc<Mutex<Option<DispatchHandle>>> = Arc::new(Mutex::new(None));
        let canceller_in_job = Arc::clone(&canceller);

        let handle = DispatchHandle::new(Box::new(move |token: &CancellationToken| {
            assert!(!token.is_cancelled());
            if let Some(h) = canceller_in_job.lock().unwrap().as_ref() {
                h.cancel(true);
            }
            observed_in_job.store(token.is_cancelled(), Ordering::SeqCst);
        }));
        *canceller.lock().unwrap() = Some(handle.clone());
        handle.run();

        assert!(observed.load(Ordering::SeqCst));
        canceller.lock().unwrap().take();
    }

    #[test]
    fn cancel_without_interrupt_leaves_token_clear() {
        let observed = Arc::new(AtomicBool::new(true));
        let observed_in_job = Arc::clone(&observed);
        let canceller: Arc<Mutex<Option<DispatchHandle>>> = Arc::new(Mutex::new(None));
        let canceller_in_job = Arc::clone(&canceller);

        let handle = DispatchHandle::new(Box::new(move |token: &CancellationToken| {
            if let Some(h) = canceller_in_job.lock().unwrap().as_ref() {
                h.cancel(false);
            }
            observed_in_job.store(token.is_cancelled(), Ordering::SeqCst);
        }));
        *canceller.lock().unwrap() = Some(handle.clone());
        handle.run();

        assert!(!observed.load(Ordering::SeqCst));
        canceller.lock().unwrap().take();
    }

    #[test]
    fn deadline_after_clamps_overflow() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_millis(5)), now + Duration::from_millis(5));

        let far = deadline_after(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(60 * 60 * 24 * 365));
    }
}

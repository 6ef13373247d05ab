use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::pool::deadline_after;

/// Error type returned by task bodies.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Task interrupted")]
    Interrupted,
}

/// The user-supplied operation run by a task.
pub type TaskBody = Box<dyn FnOnce(&TaskContext<'_>) -> Result<(), TaskError> + Send + 'static>;

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// A unit of background work with optional cancellation id, serial key and
/// start delay.
///
/// Empty ids and serial keys are treated as absent. A task with neither is
/// fire-and-forget: it cannot be cancelled or serialized against.
pub struct Task {
    pub(crate) id: Option<String>,
    pub(crate) serial: Option<String>,
    pub(crate) delay: Duration,
    pub(crate) body: TaskBody,
}

impl Task {
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            id: None,
            serial: None,
            delay: Duration::ZERO,
            body: Box::new(body),
        }
    }

    /// Cancellation identifier. Many tasks may share one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = non_empty(id.into());
        self
    }

    /// Serial key. Tasks sharing a key run one at a time in submission order.
    pub fn serial(mut self, key: impl Into<String>) -> Self {
        self.serial = non_empty(key.into());
        self
    }

    /// Minimum delay before the first dispatch attempt.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay_ms(self, millis: u64) -> Self {
        self.delay(Duration::from_millis(millis))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// How a task left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskOutcome {
    /// The body ran (successfully or not).
    Ran,
    /// Cancelled after dispatch, before the body started.
    Cancelled,
    /// Cancelled while still waiting behind a serial predecessor.
    Discarded,
}

/// State shared between the ledger, the dispatched job and [`TaskHandle`]s.
pub(crate) struct TaskShared {
    pub(crate) seq: u64,
    pub(crate) id: Option<String>,
    pub(crate) serial: Option<String>,
    pub(crate) delay: Duration,
    /// Submission time + delay, clamped to a far-future instant on overflow.
    pub(crate) target_time: Instant,
    /// Claimed exactly once, by either the run path or the cancel path.
    completed: AtomicBool,
    outcome: Mutex<Option<TaskOutcome>>,
    finished: Condvar,
}

impl TaskShared {
    pub(crate) fn new(
        seq: u64,
        id: Option<String>,
        serial: Option<String>,
        delay: Duration,
    ) -> Self {
        Self {
            seq,
            id,
            serial,
            delay,
            target_time: deadline_after(Instant::now(), delay),
            completed: AtomicBool::new(false),
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    /// Tasks with neither id nor serial key never enter the ledger.
    pub(crate) fn is_tracked(&self) -> bool {
        self.id.is_some() || self.serial.is_some()
    }

    /// Claim completion ownership. Only the first caller gets `true`.
    pub(crate) fn claim(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_claimed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn outcome_slot(&self) -> MutexGuard<'_, Option<TaskOutcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the final outcome and wake waiters. Returns `false` if an
    /// outcome was already recorded.
    pub(crate) fn finish(&self, outcome: TaskOutcome) -> bool {
        let mut slot = self.outcome_slot();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.finished.notify_all();
        true
    }
}

/// Caller-side view of a submitted task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    /// Submission sequence number, unique per scheduler.
    pub fn seq(&self) -> u64 {
        self.shared.seq
    }

    pub fn id(&self) -> Option<&str> {
        self.shared.id.as_deref()
    }

    pub fn serial_key(&self) -> Option<&str> {
        self.shared.serial.as_deref()
    }

    pub fn delay(&self) -> Duration {
        self.shared.delay
    }

    pub fn is_tracked(&self) -> bool {
        self.shared.is_tracked()
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        *self.shared.outcome_slot()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// Block until the task finishes.
    pub fn wait(&self) -> TaskOutcome {
        let mut slot = self.shared.outcome_slot();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            slot = self
                .shared
                .finished
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the task finishes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let deadline = deadline_after(Instant::now(), timeout);
        let mut slot = self.shared.outcome_slot();
        loop {
            if let Some(outcome) = *slot {
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .shared
                .finished
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("seq", &self.shared.seq)
            .field("id", &self.shared.id)
            .field("serial", &self.shared.serial)
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Execution context handed to a running body.
///
/// Borrowed for the duration of the call only, so the serial key it exposes
/// cannot leak past the body's return.
pub struct TaskContext<'a> {
    shared: &'a TaskShared,
    interrupt: &'a CancellationToken,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(shared: &'a TaskShared, interrupt: &'a CancellationToken) -> Self {
        Self { shared, interrupt }
    }

    /// Serial key the running task was submitted under.
    pub fn serial_key(&self) -> Option<&'a str> {
        self.shared.serial.as_deref()
    }

    pub fn id(&self) -> Option<&'a str> {
        self.shared.id.as_deref()
    }

    pub fn seq(&self) -> u64 {
        self.shared.seq
    }

    /// Whether a `cancel_all(.., interrupt_running = true)` reached this body.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// `Err(TaskError::Interrupted)` once interrupted, for use with `?`
    /// between steps of a long body.
    pub fn check_interrupted(&self) -> Result<(), TaskError> {
        if self.is_interrupted() {
            Err(TaskError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn noop() -> Task {
        Task::new(|_ctx| Ok(()))
    }

    #[test]
    fn empty_id_and_serial_are_absent() {
        let task = noop().id("").serial("");
        assert!(task.id.is_none());
        assert!(task.serial.is_none());

        let task = noop().id("job1").serial("x").delay_ms(250);
        assert_eq!(task.id.as_deref(), Some("job1"));
        assert_eq!(task.serial.as_deref(), Some("x"));
        assert_eq!(task.delay, Duration::from_millis(250));
    }

    #[test]
    fn tracking_requires_id_or_serial() {
        assert!(!TaskShared::new(1, None, None, Duration::ZERO).is_tracked());
        assert!(TaskShared::new(2, Some("a".into()), None, Duration::ZERO).is_tracked());
        assert!(TaskShared::new(3, None, Some("s".into()), Duration::ZERO).is_tracked());
    }

    #[test]
    fn claim_succeeds_once() {
        let shared = TaskShared::new(1, Some("a".into()), None, Duration::ZERO);
        assert!(!shared.is_claimed());
        assert!(shared.claim());
        assert!(!shared.claim());
        assert!(shared.is_claimed());
    }

    #[test]
    fn claim_race_has_single_winner() {
        for _ in 0..200 {
            let shared = Arc::new(TaskShared::new(1, Some("a".into()), None, Duration::ZERO));
            let contenders: Vec<_> = (0..4)
                .map(|_| {
                    let shared = Arc::clone(&shared);
                    thread::spawn(move || shared.claim())
                })
                .collect();
            let winners = contenders
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
        }
    }

    #[test]
    fn finish_records_first_outcome_only() {
        let shared = Arc::new(TaskShared::new(1, None, Some("s".into()), Duration::ZERO));
        let handle = TaskHandle::new(Arc::clone(&shared));
        assert!(!handle.is_finished());

        assert!(shared.finish(TaskOutcome::Cancelled));
        assert!(!shared.finish(TaskOutcome::Ran));
        assert_eq!(handle.outcome(), Some(TaskOutcome::Cancelled));
    }

    #[test]
    fn wait_timeout_expires_then_wakes() {
        let shared = Arc::new(TaskShared::new(1, Some("a".into()), None, Duration::ZERO));
        let handle = TaskHandle::new(Arc::clone(&shared));
        assert_eq!(handle.wait_timeout(Duration::from_millis(20)), None);

        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            shared.finish(TaskOutcome::Ran);
        });
        assert_eq!(handle.wait(), TaskOutcome::Ran);
        finisher.join().unwrap();
    }

    #[test]
    fn unbounded_delay_and_timeout_do_not_overflow() {
        let before = Instant::now();
        let shared = Arc::new(TaskShared::new(1, Some("far".into()), None, Duration::MAX));
        assert!(shared.target_time > before + Duration::from_secs(60 * 60 * 24 * 365));

        let handle = TaskHandle::new(Arc::clone(&shared));
        shared.finish(TaskOutcome::Cancelled);
        assert_eq!(handle.wait_timeout(Duration::MAX), Some(TaskOutcome::Cancelled));
    }

    #[test]
    fn unbounded_wait_timeout_blocks_until_finish() {
        let shared = Arc::new(TaskShared::new(1, Some("a".into()), None, Duration::ZERO));
        let handle = TaskHandle::new(Arc::clone(&shared));
        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            shared.finish(TaskOutcome::Ran);
        });
        assert_eq!(handle.wait_timeout(Duration::MAX), Some(TaskOutcome::Ran));
        finisher.join().unwrap();
    }

    #[test]
    fn context_exposes_identity_and_interrupt() {
        let shared = TaskShared::new(7, Some("job".into()), Some("trim".into()), Duration::ZERO);
        let token = CancellationToken::new();
        let ctx = TaskContext::new(&shared, &token);
        assert_eq!(ctx.serial_key(), Some("trim"));
        assert_eq!(ctx.id(), Some("job"));
        assert_eq!(ctx.seq(), 7);
        assert!(ctx.check_interrupted().is_ok());

        token.cancel();
        assert!(ctx.is_interrupted());
        assert!(matches!(ctx.check_interrupted(), Err(TaskError::Interrupted)));
    }
}

//! Delay queue feeding the rayon workers.
//!
//! A single timer thread sleeps until the earliest deadline, then hands the
//! due handle to the worker pool. A cancelled handle has already dropped its
//! job; the empty handle is discarded when its deadline comes up.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::SchedulerError;

use super::{deadline_after, DispatchHandle};

struct Delayed {
    due: Instant,
    seq: u64,
    handle: DispatchHandle,
}

// Reversed so the max-heap pops the earliest deadline; ties keep insertion order.
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

#[derive(Default)]
struct TimerState {
    queue: BinaryHeap<Delayed>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the timer thread. Dropping it stops the thread without joining.
pub(super) struct DelayTimer {
    shared: Arc<TimerShared>,
}

impl DelayTimer {
    pub(super) fn start(
        name: String,
        workers: Arc<rayon::ThreadPool>,
    ) -> Result<Self, SchedulerError> {
        let shared = Arc::new(TimerShared::default());
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(name)
            .spawn(move || run_timer(thread_shared, workers))
            .map_err(|e| SchedulerError::PoolBuild(format!("timer thread: {}", e)))?;
        Ok(Self { shared })
    }

    pub(super) fn schedule(&self, delay: Duration, handle: DispatchHandle) {
        let due = deadline_after(Instant::now(), delay);
        let mut state = self.shared.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Delayed { due, seq, handle });
        self.shared.wake.notify_one();
    }

    /// Jobs still waiting for their deadline, not counting cancelled ones.
    pub(super) fn pending(&self) -> usize {
        self.shared
            .lock()
            .queue
            .iter()
            .filter(|d| d.handle.is_pending())
            .count()
    }
}

impl Drop for DelayTimer {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        self.shared.wake.notify_one();
    }
}

/// Block until the earliest job is due, or `None` on shutdown.
fn next_due(shared: &TimerShared) -> Option<Delayed> {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return None;
        }
        let now = Instant::now();
        match state.queue.peek().map(|d| d.due) {
            None => {
                state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            Some(due) if due <= now => return state.queue.pop(),
            Some(due) => {
                state = shared
                    .wake
                    .wait_timeout(state, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
}

fn run_timer(shared: Arc<TimerShared>, workers: Arc<rayon::ThreadPool>) {
    debug!("delay timer started");
    // Jobs are handed off or dropped outside the lock: dropping one may
    // release the last reference to the pool that owns this timer.
    while let Some(delayed) = next_due(&shared) {
        let Delayed { handle, .. } = delayed;
        if handle.is_cancelled() {
            trace!("discarding cancelled delayed job");
            continue;
        }
        workers.spawn(move || handle.run());
    }
    let abandoned = std::mem::take(&mut shared.lock().queue);
    debug!(abandoned = abandoned.len(), "delay timer stopped");
    drop(abandoned);
}

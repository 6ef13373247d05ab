//! Interrupt signal for running task bodies.
//!
//! A dispatched job receives the [`CancellationToken`] owned by its
//! [`DispatchHandle`](crate::pool::DispatchHandle). Cancelling the handle with
//! `interrupt_running = true` trips the token; bodies that are already
//! running observe it through [`TaskContext`](crate::TaskContext) and stop
//! early.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag for cooperative interruption.
///
/// Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel()` has been called on this token or any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

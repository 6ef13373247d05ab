//! Bookkeeping of tracked, not-yet-completed tasks.
//!
//! Entries are kept in submission order; that order is the FIFO used to pick
//! the next task for a serial key. The ledger is only ever touched under the
//! scheduler's single mutex.

use std::sync::Arc;

use crate::pool::{DispatchHandle, Job};

use super::task::{TaskBody, TaskShared};

/// Dispatch state of a tracked task.
pub(crate) enum Slot {
    /// Waiting behind a serial predecessor; the body has not left the ledger.
    Held(TaskBody),
    /// Handed to the pool, handle not attached yet. `cancel` records a
    /// cancellation (with its interrupt flag) that arrived in the meantime.
    Dispatching { cancel: Option<bool> },
    /// Handed to the pool. `None` when the pool gave no cancellable handle.
    Dispatched(Option<DispatchHandle>),
}

impl Slot {
    fn is_dispatched(&self) -> bool {
        !matches!(self, Slot::Held(_))
    }
}

pub(crate) struct Entry {
    pub(crate) shared: Arc<TaskShared>,
    pub(crate) slot: Slot,
}

/// Result of attaching a pool handle to a freshly dispatched entry.
pub(crate) enum Attach {
    Attached,
    /// The task already completed; the handle is no longer needed.
    Gone,
    /// A cancellation arrived while the dispatch was in flight.
    CancelRequested {
        handle: Option<DispatchHandle>,
        interrupt: bool,
    },
}

/// Tasks matched by a `cancel_all` sweep, grouped by what is owed to them.
#[derive(Default)]
pub(crate) struct CancelSweep {
    /// Claimed before their body started: completion handling is owed.
    pub(crate) claimed: Vec<Arc<TaskShared>>,
    /// Already claimed by their own body; it will complete itself.
    pub(crate) running: Vec<Arc<TaskShared>>,
    /// Dispatched without a cancellable handle.
    pub(crate) uncancellable: Vec<Arc<TaskShared>>,
    /// Dispatch in flight; cancellation applied once the handle arrives.
    pub(crate) deferred: Vec<Arc<TaskShared>>,
    /// Never dispatched; removed from the ledger.
    pub(crate) discarded: Vec<Arc<TaskShared>>,
    /// Unstarted jobs taken back from cancelled handles. Dropped by the
    /// caller once the ledger lock is released.
    pub(crate) released: Vec<Job>,
}

#[derive(Default)]
pub(crate) struct Ledger {
    entries: Vec<Entry>,
}

impl Ledger {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, shared: Arc<TaskShared>, slot: Slot) {
        self.entries.push(Entry { shared, slot });
    }

    /// Whether a task with this serial key has been handed to the pool and
    /// not yet completed.
    pub(crate) fn has_dispatched(&self, serial: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.slot.is_dispatched() && e.shared.serial.as_deref() == Some(serial))
    }

    /// Tasks waiting behind a dispatched predecessor with this serial key.
    pub(crate) fn held_for(&self, serial: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.slot.is_dispatched() && e.shared.serial.as_deref() == Some(serial))
            .count()
    }

    pub(crate) fn remove(&mut self, seq: u64) -> Option<Entry> {
        let index = self.entries.iter().position(|e| e.shared.seq == seq)?;
        Some(self.entries.remove(index))
    }

    /// Take the body of the oldest task held under `serial` and mark it as
    /// dispatching. Returns `None` while another task with the key is still
    /// dispatched.
    pub(crate) fn take_successor(&mut self, serial: &str) -> Option<(Arc<TaskShared>, TaskBody)> {
        if self.has_dispatched(serial) {
            return None;
        }
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.shared.serial.as_deref() == Some(serial))?;
        match std::mem::replace(&mut entry.slot, Slot::Dispatching { cancel: None }) {
            Slot::Held(body) => Some((Arc::clone(&entry.shared), body)),
            other => {
                entry.slot = other;
                None
            }
        }
    }

    pub(crate) fn attach(&mut self, seq: u64, handle: Option<DispatchHandle>) -> Attach {
        let Some(entry) = self.entries.iter_mut().find(|e| e.shared.seq == seq) else {
            return Attach::Gone;
        };
        let pending_cancel = match entry.slot {
            Slot::Dispatching { cancel } => cancel,
            // Only the dispatching thread attaches.
            _ => None,
        };
        entry.slot = Slot::Dispatched(handle.clone());
        match pending_cancel {
            Some(interrupt) => Attach::CancelRequested { handle, interrupt },
            None => Attach::Attached,
        }
    }

    /// Apply `cancel_all` to every entry with exactly this id.
    ///
    /// Handles are cancelled and completion is claimed here, under the
    /// ledger lock; entries that were never dispatched are removed. Claimed
    /// entries stay in the ledger until completion handling removes them.
    pub(crate) fn cancel_matching(&mut self, id: &str, interrupt_running: bool) -> CancelSweep {
        let mut sweep = CancelSweep::default();
        if id.is_empty() {
            return sweep;
        }
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].shared.id.as_deref() != Some(id) {
                index += 1;
                continue;
            }
            if matches!(self.entries[index].slot, Slot::Held(_)) {
                let removed = self.entries.remove(index);
                sweep.discarded.push(removed.shared);
                continue;
            }
            let entry = &mut self.entries[index];
            match &mut entry.slot {
                Slot::Dispatched(Some(handle)) => {
                    sweep
                        .released
                        .extend(handle.cancel_and_take(interrupt_running));
                    if entry.shared.claim() {
                        sweep.claimed.push(Arc::clone(&entry.shared));
                    } else {
                        sweep.running.push(Arc::clone(&entry.shared));
                    }
                }
                Slot::Dispatched(None) => {
                    sweep.uncancellable.push(Arc::clone(&entry.shared));
                }
                Slot::Dispatching { cancel } => {
                    *cancel = Some(cancel.unwrap_or(false) || interrupt_running);
                    sweep.deferred.push(Arc::clone(&entry.shared));
                }
                Slot::Held(_) => {}
            }
            index += 1;
        }
        sweep
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::pool::{RayonPool, WorkerPool};
use crate::scheduler::fault::{log_fault, FaultHandler};
use crate::scheduler::ledger::Ledger;
use crate::scheduler::metrics::SchedulerMetrics;

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// Background task scheduler with serial queues and safe cancellation.
///
/// Cheap to clone; clones share the same ledger and pool.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) pool: Arc<dyn WorkerPool>,
    /// Tracked tasks. The one lock guarding all scheduling decisions.
    pub(super) ledger: Mutex<Ledger>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    pub(super) fault_handler: RwLock<FaultHandler>,
    next_seq: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler on top of an existing pool.
    pub fn new(pool: Arc<dyn WorkerPool>) -> Self {
        let fault_handler: FaultHandler = Arc::new(log_fault);
        Self {
            inner: Arc::new(Inner {
                pool,
                ledger: Mutex::new(Ledger::default()),
                metrics: RwLock::new(SchedulerMetrics::default()),
                fault_handler: RwLock::new(fault_handler),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Create a scheduler with its own [`RayonPool`].
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let pool = RayonPool::new(config)?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// The process-wide scheduler, built from the environment on first use
    /// unless one was installed with [`Scheduler::install_global`].
    pub fn global() -> Result<&'static Scheduler, SchedulerError> {
        if let Some(scheduler) = GLOBAL.get() {
            return Ok(scheduler);
        }
        let scheduler = Self::from_config(&SchedulerConfig::from_env())?;
        info!("process-wide scheduler initialized");
        Ok(GLOBAL.get_or_init(|| scheduler))
    }

    /// Install the process-wide scheduler. Fails once one is in place.
    pub fn install_global(scheduler: Scheduler) -> Result<(), SchedulerError> {
        GLOBAL
            .set(scheduler)
            .map_err(|_| SchedulerError::GlobalAlreadyInstalled)
    }

    /// Replace the handler that receives body errors and panics.
    pub fn set_fault_handler(&self, handler: FaultHandler) {
        let mut slot = self
            .inner
            .fault_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = handler;
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = self
            .inner
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.tracked = self.tracked_count();
        snapshot
    }

    /// Tasks currently in the ledger.
    pub fn tracked_count(&self) -> usize {
        self.inner.ledger().len()
    }

    /// Tasks waiting behind a running predecessor with this serial key.
    pub fn held_for(&self, serial: &str) -> usize {
        self.inner.ledger().held_for(serial)
    }

    /// Get a handle to the underlying pool.
    pub fn pool(&self) -> Arc<dyn WorkerPool> {
        Arc::clone(&self.inner.pool)
    }
}

impl Inner {
    pub(super) fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn record(&self, update: impl FnOnce(&mut SchedulerMetrics)) {
        if let Ok(mut metrics) = self.metrics.write() {
            update(&mut metrics);
        }
    }

    pub(super) fn fault_handler(&self) -> FaultHandler {
        Arc::clone(&self.fault_handler.read().unwrap_or_else(PoisonError::into_inner))
    }
}

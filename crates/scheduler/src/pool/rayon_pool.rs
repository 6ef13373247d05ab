use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

use super::timer::DelayTimer;
use super::{DispatchHandle, Job, WorkerPool};

/// [`WorkerPool`] backed by a `rayon` thread pool.
///
/// Delayed jobs wait on a timer thread and are spawned onto rayon when due.
/// The capability flags in [`SchedulerConfig`] decide whether delays are
/// accepted and whether immediate dispatch hands back a handle.
pub struct RayonPool {
    workers: Arc<rayon::ThreadPool>,
    timer: Option<DelayTimer>,
    cancellable: bool,
}

impl RayonPool {
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let num_workers = config.resolved_worker_threads();
        let prefix = config.thread_name_prefix.clone();
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| SchedulerError::PoolBuild(e.to_string()))?;
        let workers = Arc::new(workers);

        let timer = if config.delayed_dispatch {
            Some(DelayTimer::start(
                format!("{}-timer", config.thread_name_prefix),
                Arc::clone(&workers),
            )?)
        } else {
            None
        };

        info!(
            workers = num_workers,
            delayed = config.delayed_dispatch,
            cancellable = config.cancellable_dispatch,
            "worker pool started"
        );

        Ok(Self {
            workers,
            timer,
            cancellable: config.cancellable_dispatch,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.current_num_threads()
    }

    /// Delayed jobs not yet handed to a worker.
    pub fn pending_delayed(&self) -> usize {
        self.timer.as_ref().map_or(0, DelayTimer::pending)
    }
}

impl WorkerPool for RayonPool {
    fn supports_delayed_dispatch(&self) -> bool {
        self.timer.is_some()
    }

    fn dispatch_now(&self, job: Job) -> Option<DispatchHandle> {
        if self.cancellable {
            let handle = DispatchHandle::new(job);
            let worker_handle = handle.clone();
            self.workers.spawn(move || worker_handle.run());
            Some(handle)
        } else {
            self.workers.spawn(move || job(&CancellationToken::new()));
            None
        }
    }

    fn dispatch_after(&self, job: Job, delay: Duration) -> Result<DispatchHandle, SchedulerError> {
        let timer = self
            .timer
            .as_ref()
            .ok_or(SchedulerError::SchedulingUnsupported { delay })?;
        let handle = DispatchHandle::new(job);
        timer.schedule(delay, handle.clone());
        Ok(handle)
    }
}

impl Drop for RayonPool {
    fn drop(&mut self) {
        info!(pending_delayed = self.pending_delayed(), "worker pool shutting down");
    }
}

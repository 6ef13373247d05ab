pub mod cancel;
pub mod config;
pub mod error;
pub mod pool;
pub mod scheduler;

pub use cancel::CancellationToken;
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use pool::{DispatchHandle, Job, RayonPool, WorkerPool};
pub use scheduler::{
    CancelReport, FaultHandler, FaultKind, Scheduler, SchedulerMetrics, Task, TaskContext,
    TaskError, TaskFault, TaskHandle, TaskOutcome,
};

//! Background task scheduler with serial queues and safe cancellation.
//!
//! Tasks sharing a serial key run one at a time in submission order. Any
//! tracked task (one with an id or serial key) can be cancelled by id; a task
//! cancelled after dispatch but before it starts still gets exactly one
//! completion step, so its serial successors are released.

pub mod fault;
pub(crate) mod ledger;
pub mod metrics;
pub mod runner;
pub mod task;

pub use fault::{log_fault, FaultHandler, FaultKind, TaskFault};
pub use metrics::SchedulerMetrics;
pub use runner::{CancelReport, Scheduler};
pub use task::{Task, TaskBody, TaskContext, TaskError, TaskHandle, TaskOutcome};

//! Scheduler runner -- submission, dispatch and completion handling.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructors, process-wide instance, accessors
//! - `scheduling`: `submit` and `cancel_all`, the ledger-side decisions
//! - `execution`: pool hand-off, the task run path and completion handling

mod core;
mod execution;
mod scheduling;

pub use self::core::Scheduler;
pub use self::scheduling::CancelReport;

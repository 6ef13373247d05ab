//! Integration test for the process-wide scheduler.
//!
//! Kept in its own test binary: the global instance lives for the whole
//! process, so it is built here from the environment defaults.

use std::time::Duration;

use trimmer_scheduler::{Scheduler, SchedulerConfig, SchedulerError, Task, TaskOutcome};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn global_is_built_lazily_and_shared() {
    let first = Scheduler::global().unwrap();
    let second = Scheduler::global().unwrap();
    assert!(std::ptr::eq(first, second));

    let handle = first
        .submit(Task::new(|_ctx| Ok(())).id("global"))
        .unwrap();
    assert_eq!(handle.wait_timeout(TIMEOUT), Some(TaskOutcome::Ran));

    let late = Scheduler::from_config(&SchedulerConfig {
        worker_threads: 1,
        ..SchedulerConfig::default()
    })
    .unwrap();
    let err = Scheduler::install_global(late).unwrap_err();
    assert!(matches!(err, SchedulerError::GlobalAlreadyInstalled));
}

//! Unhandled task faults.
//!
//! A body that returns an error or panics never skips completion handling.
//! Once bookkeeping is done the fault goes to the scheduler's fault handler,
//! which logs it by default.

use std::any::Any;
use std::sync::Arc;

use tracing::error;

use crate::error::SchedulerError;

use super::task::TaskError;

#[derive(Debug, thiserror::Error)]
pub enum FaultKind {
    #[error("{0}")]
    Error(TaskError),
    #[error("panicked: {0}")]
    Panic(String),
    #[error("serial successor could not be dispatched: {0}")]
    Dispatch(SchedulerError),
}

#[derive(Debug, thiserror::Error)]
#[error("task {seq} (id: {id:?}, serial: {serial:?}) faulted: {kind}")]
pub struct TaskFault {
    pub seq: u64,
    pub id: Option<String>,
    pub serial: Option<String>,
    #[source]
    pub kind: FaultKind,
}

/// Process-wide sink for task faults.
pub type FaultHandler = Arc<dyn Fn(&TaskFault) + Send + Sync>;

/// Default handler: log at error level.
pub fn log_fault(fault: &TaskFault) {
    error!(
        task = fault.seq,
        id = ?fault.id,
        serial = ?fault.serial,
        error = %fault.kind,
        "background task faulted"
    );
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_from_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn fault_display_includes_identity() {
        let fault = TaskFault {
            seq: 3,
            id: Some("job1".into()),
            serial: None,
            kind: FaultKind::Error(TaskError::Failed("disk full".into())),
        };
        let text = fault.to_string();
        assert!(text.contains("task 3"));
        assert!(text.contains("job1"));
        assert!(text.contains("disk full"));
    }
}

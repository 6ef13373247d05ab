//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("worker pool does not support delayed dispatch (requested {delay:?})")]
    SchedulingUnsupported { delay: Duration },

    #[error("failed to build worker pool: {0}")]
    PoolBuild(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("a process-wide scheduler is already installed")]
    GlobalAlreadyInstalled,
}

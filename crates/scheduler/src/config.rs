//! Scheduler configuration.
//!
//! Parsed from TOML or built from environment variables (a `.env` file is
//! honoured when present). Every field has a default, so an empty document
//! yields [`SchedulerConfig::default`].

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SchedulerError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = env_opt(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "ignoring unparsable environment flag");
            None
        }
    }
}

/// Worker pool and scheduler configuration.
///
/// `delayed_dispatch` and `cancellable_dispatch` select the capability
/// profile of the pool: both on behaves like a scheduled executor, delays off
/// like a plain executor service, both off like a bare fire-and-forget
/// executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = twice the available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Whether the pool accepts jobs with a positive delay.
    #[serde(default = "default_true")]
    pub delayed_dispatch: bool,
    /// Whether immediate dispatch returns a cancellable handle.
    #[serde(default = "default_true")]
    pub cancellable_dispatch: bool,
    /// Prefix for worker thread names.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_worker_threads() -> usize { 0 }
fn default_true() -> bool { true }
fn default_thread_name_prefix() -> String { "trim-worker".to_string() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            delayed_dispatch: default_true(),
            cancellable_dispatch: default_true(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Parse a config from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, SchedulerError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Build config from `TRIM_*` environment variables on top of the
    /// defaults. Loads `.env` first.
    pub fn from_env() -> Self {
        load_dotenv();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `TRIM_*` environment overrides onto this config.
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse("TRIM_WORKER_THREADS") {
            self.worker_threads = n;
        }
        if let Some(flag) = env_flag("TRIM_DELAYED_DISPATCH") {
            self.delayed_dispatch = flag;
        }
        if let Some(flag) = env_flag("TRIM_CANCELLABLE_DISPATCH") {
            self.cancellable_dispatch = flag;
        }
        if let Some(prefix) = env_opt("TRIM_THREAD_PREFIX") {
            self.thread_name_prefix = prefix;
        }
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(SchedulerError::Config(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve worker thread count (0 means twice the available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert!(config.delayed_dispatch);
        assert!(config.cancellable_dispatch);
        assert_eq!(config.thread_name_prefix, "trim-worker");
    }

    #[test]
    fn resolved_worker_threads() {
        let mut config = SchedulerConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_worker_threads() > 0);

        config.worker_threads = 3;
        assert_eq!(config.resolved_worker_threads(), 3);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            worker_threads = 2
            delayed_dispatch = false
            "#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, 2);
        assert!(!config.delayed_dispatch);
        assert!(config.cancellable_dispatch);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = SchedulerConfig::from_toml_str("worker_threads = \"many\"").unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigParse(_)));
    }

    #[test]
    fn blank_thread_prefix_rejected() {
        let err = SchedulerConfig::from_toml_str("thread_name_prefix = \"  \"").unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SchedulerConfig::from_file("/nonexistent/trim-scheduler.toml").unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigIo(_)));
    }
}

//! Configuration for the interruption controller.

use std::time::Duration;

use anyhow::Result;

/// Interruption controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the interruption queue to poll.
    pub queue_name: String,

    /// Pause after a queue transport failure before polling again.
    ///
    /// The reconcile tick itself never backs off; cadence after a
    /// failed fetch is governed here, by the worker.
    pub error_backoff: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let queue_name = std::env::var("NODEWARD_QUEUE_NAME")
            .unwrap_or_else(|_| "nodeward-interruptions".to_string());

        let error_backoff_secs = std::env::var("NODEWARD_ERROR_BACKOFF_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let log_level = std::env::var("NODEWARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            queue_name,
            error_backoff: Duration::from_secs(error_backoff_secs),
            log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_name: "nodeward-interruptions".to_string(),
            error_backoff: Duration::from_secs(5),
            log_level: "info".to_string(),
        }
    }
}

//! Configuration for the orchestration runtime
//!
//! Settings are layered through the `config` crate: optional
//! `config/default` and `config/local` files, then `AGENT_SWARM__*`
//! environment variables (for example `AGENT_SWARM__QUEUE__WORKER_COUNT=8`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::{Error, Result};

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub workflow: WorkflowConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub queue: QueueSettings,
    pub logging: LoggingConfig,
}

/// Workflow execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Extra attempts per sequential step after the first failure
    pub max_retries: u32,
    /// Base retry delay; attempt `n` waits `n * base`
    pub retry_base_delay_ms: u64,
    /// Optional cap on concurrently running parallel tasks
    pub max_parallel: Option<usize>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay_ms: 500,
            max_parallel: None,
        }
    }
}

impl WorkflowConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }
}

/// Deferred execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub worker_count: usize,
    pub worker_id_prefix: String,
    /// Sleep between polls of an empty queue
    pub poll_interval_ms: u64,
    /// Sleep between status checks while waiting for a result
    pub result_poll_interval_ms: u64,
    pub default_max_retries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            worker_count: 3,
            worker_id_prefix: "worker".to_string(),
            poll_interval_ms: 1000,
            result_poll_interval_ms: 500,
            default_max_retries: 3,
        }
    }
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn result_poll_interval(&self) -> Duration {
        Duration::from_millis(self.result_poll_interval_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl OrchestratorConfig {
    /// Load layered configuration from files and environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("AGENT_SWARM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: OrchestratorConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from one explicit file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        let config: OrchestratorConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(Error::configuration(
                "circuit_breaker.failure_threshold must be greater than zero",
            ));
        }
        if breaker.success_threshold == 0 {
            return Err(Error::configuration(
                "circuit_breaker.success_threshold must be greater than zero",
            ));
        }
        if breaker.half_open_max_calls == 0 {
            return Err(Error::configuration(
                "circuit_breaker.half_open_max_calls must be greater than zero",
            ));
        }
        if let Some(rate) = breaker.failure_rate_threshold {
            if !(rate > 0.0 && rate <= 100.0) {
                return Err(Error::configuration(format!(
                    "circuit_breaker.failure_rate_threshold must be in (0, 100], got {}",
                    rate
                )));
            }
        }

        if self.workflow.max_parallel == Some(0) {
            return Err(Error::configuration(
                "workflow.max_parallel must be greater than zero when set",
            ));
        }

        let queue = &self.queue;
        if queue.worker_count == 0 {
            return Err(Error::configuration(
                "queue.worker_count must be greater than zero",
            ));
        }
        if queue.poll_interval_ms == 0 || queue.result_poll_interval_ms == 0 {
            return Err(Error::configuration(
                "queue poll intervals must be greater than zero",
            ));
        }
        if queue.worker_id_prefix.trim().is_empty() {
            return Err(Error::configuration(
                "queue.worker_id_prefix cannot be empty",
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(Error::configuration("logging.level cannot be empty"));
        }

        Ok(())
    }
}

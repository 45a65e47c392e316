//! # Engine Configuration
//!
//! Every recognised option with its default:
//!
//! | key                         | default   |
//! |-----------------------------|-----------|
//! | `max_concurrent_executions` | 10        |
//! | `default_timeout_ms`        | 300000    |
//! | `approval_timeout_ms`       | 1800000   |
//! | `retry_delay_ms`            | 500       |
//! | `max_retry_delay_ms`        | 30000     |
//! | `max_depth`                 | 20        |
//! | `default_loop_iterations`   | 3         |
//! | `max_data_safety`           | `RISKY`   |
//! | `archive_path`              | none      |
//! | `notification_targets`      | empty     |
//! | `logging.*`                 | see [`LoggingConfig`] |
//!
//! Values come from an optional file (toml, yaml or json, picked by
//! extension) overlaid with `RECOVERY_ENGINE__*` environment variables,
//! e.g. `RECOVERY_ENGINE__MAX_DEPTH=30` or
//! `RECOVERY_ENGINE__LOGGING__LEVEL=debug`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::retry::RetryPolicy;
use crate::strategy::DataSafety;

const ENV_PREFIX: &str = "RECOVERY_ENGINE";

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrently running recoveries
    pub max_concurrent_executions: usize,
    /// Deadline for a single executor call when the node sets none
    pub default_timeout_ms: u64,
    /// How long a gate waits for a human before suspending the run
    pub approval_timeout_ms: u64,
    /// Base delay between retries of a failing action
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Depth ceiling protecting against cyclic strategy graphs
    pub max_depth: usize,
    /// Iteration cap for LOOP nodes that declare none
    pub default_loop_iterations: u32,
    /// Riskiest data-safety level the selector may choose
    pub max_data_safety: DataSafety,
    /// NDJSON file completed decision paths are appended to
    pub archive_path: Option<PathBuf>,
    /// Where escalations would be announced; delivery happens elsewhere
    pub notification_targets: Vec<String>,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            default_timeout_ms: 300_000,
            approval_timeout_ms: 1_800_000,
            retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            max_depth: 20,
            default_loop_iterations: 3,
            max_data_safety: DataSafety::Risky,
            archive_path: None,
            notification_targets: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration, falling back to defaults on any problem.
    ///
    /// A missing or malformed file produces a single warning and the
    /// documented defaults; this never fails.
    pub fn load(path: Option<&Path>) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                info!(
                    path = ?path,
                    max_depth = config.max_depth,
                    max_concurrent = config.max_concurrent_executions,
                    "Recovery engine configuration loaded"
                );
                config
            }
            Err(e) => {
                warn!(
                    path = ?path,
                    error = %e,
                    "Failed to load recovery engine configuration; using defaults"
                );
                Self::default()
            }
        }
    }

    /// Loads configuration and reports any failure to the caller
    pub fn try_load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(Error::InvalidConfig("max_depth must be at least 1".to_string()));
        }
        if self.default_loop_iterations == 0 {
            return Err(Error::InvalidConfig(
                "default_loop_iterations must be at least 1".to_string(),
            ));
        }
        if self.retry_delay_ms > self.max_retry_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry_delay_ms ({}) exceeds max_retry_delay_ms ({})",
                self.retry_delay_ms, self.max_retry_delay_ms
            )));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_delay_ms),
            Duration::from_millis(self.max_retry_delay_ms),
        )
    }
}

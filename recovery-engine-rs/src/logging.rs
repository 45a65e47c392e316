//! # Structured Logging
//!
//! Installs the process-wide `tracing` subscriber used by the engine and
//! provides the severity-aware summary logged for every finished recovery.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::error::{Error, Result};
use crate::path::{DecisionPath, DecisionResult};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to output logs to a file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "recovery-engine".to_string(),
            file_output: false,
            log_dir: None,
            json_format: true,
        }
    }
}

/// Initializes the structured logging system.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<()> {
    // Don't re-initialize if already done
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.cloned().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", config.level)));

    // File output goes under the console layer, whose type differs per format
    let file_layer = match (&config.file_output, &config.log_dir) {
        (true, Some(log_dir)) => {
            let file_appender = RollingFileAppender::new(
                tracing_appender::rolling::Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (non_blocking, guard) = NonBlocking::new(file_appender);

            // Keep the guard alive for the lifetime of the program
            Box::leak(Box::new(guard));

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        _ => None,
    };

    let subscriber = Registry::default().with(filter).with(file_layer);

    let installed = if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .with_span_list(true);
        tracing::subscriber::set_global_default(subscriber.with(json_layer))
    } else {
        let text_layer = fmt::layer().with_target(true).with_thread_ids(true);
        tracing::subscriber::set_global_default(subscriber.with(text_layer))
    };

    installed.map_err(|e| Error::Initialization(format!("Failed to set global subscriber: {}", e)))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Logs a finished decision path at a level matching its outcome
pub fn log_path_summary(path: &DecisionPath) {
    let result = path
        .final_result
        .map(|r| r.as_str())
        .unwrap_or("UNFINISHED");
    let strategy = path.strategy_id.as_deref().unwrap_or("none");

    match path.final_result {
        Some(DecisionResult::Success) | Some(DecisionResult::PartialSuccess) => {
            info!(
                path_id = %path.path_id,
                failure_id = %path.failure_id,
                strategy = %strategy,
                result = %result,
                dry_run = path.dry_run,
                nodes = path.nodes_visited.len(),
                actions_ok = path.actions_successful,
                actions_failed = path.actions_failed,
                duration_ms = path.total_execution_time_ms,
                "Recovery completed"
            );
        }
        Some(DecisionResult::RequiresApproval)
        | Some(DecisionResult::EscalationNeeded)
        | Some(DecisionResult::ManualIntervention)
        | Some(DecisionResult::Cancelled) => {
            warn!(
                path_id = %path.path_id,
                failure_id = %path.failure_id,
                strategy = %strategy,
                result = %result,
                suspended_at = ?path.suspended_at,
                "Recovery handed over to operators"
            );
        }
        _ => {
            error!(
                path_id = %path.path_id,
                failure_id = %path.failure_id,
                strategy = %strategy,
                result = %result,
                error = ?path.error_message,
                actions_failed = path.actions_failed,
                "Recovery failed"
            );
        }
    }
}

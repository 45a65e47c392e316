//! # Action Retry Policy
//!
//! Exponential backoff with jitter between repeated attempts of the same
//! ACTION node. Only the delay calculation lives here; the interpreter
//! decides when another attempt is warranted.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff settings for node retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,

    /// Jitter factor (0.0 - 1.0) to add randomness to backoff
    pub jitter_factor: f64,

    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.1,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            base_backoff,
            max_backoff,
            ..Default::default()
        }
    }

    /// A policy that retries immediately; used by tests and dry runs
    pub fn immediate() -> Self {
        Self {
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_factor: 0.0,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0 = first retry)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;

        let backoff_ms = (base_ms * self.multiplier.powi(attempt as i32)).min(max_ms);
        if backoff_ms <= 0.0 {
            return Duration::ZERO;
        }

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let backoff_ms = if jitter > 0.0 {
            let spread = backoff_ms * jitter;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (backoff_ms + offset).clamp(0.0, max_ms)
        } else {
            backoff_ms
        };

        Duration::from_millis(backoff_ms as u64)
    }
}

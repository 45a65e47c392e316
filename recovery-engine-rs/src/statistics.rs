//! # Execution Statistics
//!
//! Running counters over every finished recovery. All updates happen inside
//! one critical section so concurrent runs never observe a half-applied
//! update; rates are derived when a snapshot is taken.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::path::{DecisionPath, DecisionResult};

/// Per-strategy counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub total: u64,
    pub successful: u64,
    pub success_rate: f64,
}

/// Snapshot returned by `RecoveryEngine::statistics`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub overall_success_rate: f64,
    pub average_duration_ms: f64,
    /// Count of runs per final result
    pub results: BTreeMap<DecisionResult, u64>,
    pub per_strategy: BTreeMap<String, StrategyStats>,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    average_duration_ms: f64,
    results: BTreeMap<DecisionResult, u64>,
    per_strategy: BTreeMap<String, (u64, u64)>,
}

#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    counters: Mutex<Counters>,
}

fn rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    }
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one finished path into the counters
    pub fn record(&self, path: &DecisionPath) {
        let result = path.final_result.unwrap_or(DecisionResult::Failure);
        let mut counters = self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        counters.total += 1;
        if path.success {
            counters.successful += 1;
        } else {
            counters.failed += 1;
        }

        // incremental mean
        let n = counters.total as f64;
        counters.average_duration_ms += (path.total_execution_time_ms - counters.average_duration_ms) / n;

        *counters.results.entry(result).or_insert(0) += 1;

        if let Some(strategy_id) = &path.strategy_id {
            let entry = counters.per_strategy.entry(strategy_id.clone()).or_insert((0, 0));
            entry.0 += 1;
            if path.success {
                entry.1 += 1;
            }
        }
    }

    pub fn snapshot(&self) -> EngineStatistics {
        let counters = self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        EngineStatistics {
            total_runs: counters.total,
            successful_runs: counters.successful,
            failed_runs: counters.failed,
            overall_success_rate: rate(counters.successful, counters.total),
            average_duration_ms: counters.average_duration_ms,
            results: counters.results.clone(),
            per_strategy: counters
                .per_strategy
                .iter()
                .map(|(id, &(total, successful))| {
                    (
                        id.clone(),
                        StrategyStats {
                            total,
                            successful,
                            success_rate: rate(successful, total),
                        },
                    )
                })
                .collect(),
        }
    }
}

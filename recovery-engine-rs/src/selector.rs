//! # Strategy Selection
//!
//! Scores every catalogued strategy against an incoming failure and picks
//! the best match.
//!
//! Scoring:
//! - +3.0 when the failure type is one of the strategy's failure types
//! - +2.0 when the severity is one of the strategy's severity levels
//! - +0.5 per shared affected component, capped at +2.0
//! - +1.0 when the failure's environment is one of the strategy's environments
//!
//! A strategy whose filters match nothing is excluded outright; otherwise
//! its static success rate is added to the match score. Ties keep the
//! strategy registered first in the catalog.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::StrategyCatalog;
use crate::failure::CategorizedFailure;
use crate::strategy::{DataSafety, RecoveryStrategy};

const TYPE_WEIGHT: f64 = 3.0;
const SEVERITY_WEIGHT: f64 = 2.0;
const COMPONENT_WEIGHT: f64 = 0.5;
const COMPONENT_CAP: f64 = 2.0;
const ENVIRONMENT_WEIGHT: f64 = 1.0;

/// Score breakdown for one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyScore {
    pub strategy_id: String,
    /// Sum of the filter matches, excluding the success rate
    pub match_score: f64,
    /// `match_score` plus the static success rate
    pub total: f64,
    pub matched_components: usize,
}

/// Picks the best strategy for a failure
#[derive(Debug, Clone)]
pub struct StrategySelector {
    catalog: Arc<StrategyCatalog>,
    max_data_safety: DataSafety,
}

impl StrategySelector {
    pub fn new(catalog: Arc<StrategyCatalog>) -> Self {
        Self {
            catalog,
            max_data_safety: DataSafety::Risky,
        }
    }

    /// Excludes strategies riskier than `max`
    pub fn with_max_data_safety(mut self, max: DataSafety) -> Self {
        self.max_data_safety = max;
        self
    }

    /// Scores a single strategy; `None` when it is not eligible
    pub fn score(&self, failure: &CategorizedFailure, strategy: &RecoveryStrategy) -> Option<StrategyScore> {
        if strategy.data_safety > self.max_data_safety {
            return None;
        }

        let mut match_score = 0.0;
        if strategy.failure_types.contains(&failure.failure_type) {
            match_score += TYPE_WEIGHT;
        }
        if strategy.severity_levels.contains(&failure.severity) {
            match_score += SEVERITY_WEIGHT;
        }
        let matched_components = failure
            .affected_components
            .intersection(&strategy.component_types)
            .count();
        match_score += (COMPONENT_WEIGHT * matched_components as f64).min(COMPONENT_CAP);
        if strategy.environments.contains(failure.environment()) {
            match_score += ENVIRONMENT_WEIGHT;
        }

        if match_score <= 0.0 {
            return None;
        }

        Some(StrategyScore {
            strategy_id: strategy.id.clone(),
            match_score,
            total: match_score + strategy.success_rate,
            matched_components,
        })
    }

    /// All eligible strategies, best first; equal scores keep catalog order
    pub fn rank(&self, failure: &CategorizedFailure) -> Vec<StrategyScore> {
        let mut scores: Vec<StrategyScore> = self
            .catalog
            .iter()
            .filter_map(|strategy| self.score(failure, strategy))
            .collect();
        // stable sort keeps registration order among ties
        scores.sort_by(|a, b| b.total.total_cmp(&a.total));
        scores
    }

    /// The highest-scoring strategy, or `None` when nothing applies
    pub fn select(&self, failure: &CategorizedFailure) -> Option<(Arc<RecoveryStrategy>, StrategyScore)> {
        let mut best: Option<(Arc<RecoveryStrategy>, StrategyScore)> = None;

        for strategy in self.catalog.iter() {
            let Some(score) = self.score(failure, strategy) else {
                continue;
            };
            debug!(
                failure_id = %failure.failure_id,
                strategy = %strategy.id,
                score = score.total,
                "Scored recovery strategy"
            );
            let better = match &best {
                Some((_, current)) => score.total > current.total,
                None => true,
            };
            if better {
                best = Some((strategy.clone(), score));
            }
        }

        best
    }
}

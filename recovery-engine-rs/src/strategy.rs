//! # Recovery Strategies
//!
//! A recovery strategy is a named decision tree plus the applicability
//! filters the selector scores against. Strategies are validated once when
//! built and are never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::failure::{ComponentType, FailureType, Severity};
use crate::node::{DecisionNode, NodeType};

/// How much risk a strategy poses to stored data, least risky first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSafety {
    /// No data is modified
    Safe,
    /// Data is modified but recoverable (failover, cache flush)
    Cautious,
    /// Data may be lost or overwritten (restore from backup)
    Risky,
}

impl fmt::Display for DataSafety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSafety::Safe => write!(f, "SAFE"),
            DataSafety::Cautious => write!(f, "CAUTIOUS"),
            DataSafety::Risky => write!(f, "RISKY"),
        }
    }
}

impl Default for DataSafety {
    fn default() -> Self {
        DataSafety::Safe
    }
}

/// A decision tree plus the filters used to decide when it applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub failure_types: BTreeSet<FailureType>,
    pub severity_levels: BTreeSet<Severity>,
    pub component_types: BTreeSet<ComponentType>,
    pub environments: BTreeSet<String>,
    pub root_node_id: String,
    pub nodes: BTreeMap<String, DecisionNode>,
    pub estimated_duration_secs: u64,
    /// Historical success rate from the catalog, 0.0 - 1.0
    pub success_rate: f64,
    pub requires_human_oversight: bool,
    pub data_safety: DataSafety,
    pub max_execution_time_secs: u64,
}

impl RecoveryStrategy {
    pub fn builder<I: Into<String>, N: Into<String>>(id: I, name: N) -> StrategyBuilder {
        StrategyBuilder::new(id, name)
    }

    pub fn node(&self, node_id: &str) -> Option<&DecisionNode> {
        self.nodes.get(node_id)
    }

    pub fn root(&self) -> Option<&DecisionNode> {
        self.node(&self.root_node_id)
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_time_secs)
    }

    /// Pairs of (referencing node, missing target) for every reference that
    /// leaves the node map
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        let mut dangling = Vec::new();
        for node in self.nodes.values() {
            for target in node.references() {
                if !self.nodes.contains_key(target) {
                    dangling.push((node.id.clone(), target.to_string()));
                }
            }
        }
        dangling
    }

    /// Action identifiers used by ACTION/GATE nodes
    pub fn action_ids(&self) -> BTreeSet<&str> {
        self.nodes
            .values()
            .filter_map(|node| node.action.as_deref())
            .collect()
    }

    /// Checks the structural invariants every catalogued strategy must hold
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidStrategy {
            strategy_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("strategy id must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(invalid(format!(
                "success rate {} outside 0.0 - 1.0",
                self.success_rate
            )));
        }
        if !self.nodes.contains_key(&self.root_node_id) {
            return Err(invalid(format!("root node '{}' does not exist", self.root_node_id)));
        }

        for (key, node) in &self.nodes {
            if key != &node.id {
                return Err(invalid(format!("node stored under '{}' has id '{}'", key, node.id)));
            }
            match node.node_type {
                NodeType::Condition if node.condition.is_none() => {
                    return Err(invalid(format!("condition node '{}' has no predicate", node.id)));
                }
                NodeType::Action | NodeType::Gate if node.action.is_none() => {
                    return Err(invalid(format!("{} node '{}' has no action", node.node_type, node.id)));
                }
                NodeType::Route | NodeType::Parallel | NodeType::Loop if node.children.is_empty() => {
                    return Err(invalid(format!("{} node '{}' has no children", node.node_type, node.id)));
                }
                _ => {}
            }
        }

        if let Some((from, to)) = self.dangling_references().into_iter().next() {
            return Err(invalid(format!("node '{}' references missing node '{}'", from, to)));
        }

        Ok(())
    }
}

/// Fluent builder that validates the finished strategy
#[derive(Debug, Clone)]
pub struct StrategyBuilder {
    strategy: RecoveryStrategy,
}

impl StrategyBuilder {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self {
            strategy: RecoveryStrategy {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                failure_types: BTreeSet::new(),
                severity_levels: BTreeSet::new(),
                component_types: BTreeSet::new(),
                environments: BTreeSet::new(),
                root_node_id: String::new(),
                nodes: BTreeMap::new(),
                estimated_duration_secs: 300,
                success_rate: 0.5,
                requires_human_oversight: false,
                data_safety: DataSafety::Safe,
                max_execution_time_secs: 1800,
            },
        }
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.strategy.description = description.into();
        self
    }

    pub fn failure_types(mut self, types: &[FailureType]) -> Self {
        self.strategy.failure_types.extend(types.iter().copied());
        self
    }

    pub fn severities(mut self, severities: &[Severity]) -> Self {
        self.strategy.severity_levels.extend(severities.iter().copied());
        self
    }

    pub fn components(mut self, components: &[ComponentType]) -> Self {
        self.strategy.component_types.extend(components.iter().copied());
        self
    }

    pub fn environments(mut self, environments: &[&str]) -> Self {
        self.strategy
            .environments
            .extend(environments.iter().map(|e| e.to_string()));
        self
    }

    pub fn root<S: Into<String>>(mut self, node_id: S) -> Self {
        self.strategy.root_node_id = node_id.into();
        self
    }

    /// Adds a node; the first node added becomes the root unless `root` is set
    pub fn node(mut self, node: DecisionNode) -> Self {
        if self.strategy.root_node_id.is_empty() {
            self.strategy.root_node_id = node.id.clone();
        }
        self.strategy.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn estimated_duration(mut self, duration: Duration) -> Self {
        self.strategy.estimated_duration_secs = duration.as_secs();
        self
    }

    pub fn success_rate(mut self, rate: f64) -> Self {
        self.strategy.success_rate = rate;
        self
    }

    pub fn human_oversight(mut self, required: bool) -> Self {
        self.strategy.requires_human_oversight = required;
        self
    }

    pub fn data_safety(mut self, safety: DataSafety) -> Self {
        self.strategy.data_safety = safety;
        self
    }

    pub fn max_execution_time(mut self, duration: Duration) -> Self {
        self.strategy.max_execution_time_secs = duration.as_secs();
        self
    }

    /// Validates and returns the strategy
    pub fn build(self) -> Result<RecoveryStrategy> {
        self.strategy.validate()?;
        Ok(self.strategy)
    }

    /// Returns the strategy without validation; for callers that deliberately
    /// hand the interpreter a malformed graph
    pub fn build_unchecked(self) -> RecoveryStrategy {
        self.strategy
    }
}

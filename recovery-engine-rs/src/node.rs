//! # Decision Nodes
//!
//! One vertex of a strategy's decision tree. Nodes live in a flat id-keyed
//! map owned by their strategy and refer to each other by id only.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, Params};

/// Determines how a node is evaluated and where control flows next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Evaluate a predicate and branch on it
    Condition,
    /// Invoke a registered action executor and branch on the outcome
    Action,
    /// An action that needs human approval before it runs
    Gate,
    /// Forward to the first child
    Route,
    /// Run every child branch and aggregate
    Parallel,
    /// Repeat the child branches a bounded number of times
    Loop,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Condition => write!(f, "CONDITION"),
            NodeType::Action => write!(f, "ACTION"),
            NodeType::Gate => write!(f, "GATE"),
            NodeType::Route => write!(f, "ROUTE"),
            NodeType::Parallel => write!(f, "PARALLEL"),
            NodeType::Loop => write!(f, "LOOP"),
        }
    }
}

/// A vertex in a recovery strategy's decision graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub description: String,
    /// Predicate for CONDITION nodes, exit condition for LOOP nodes
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Action identifier for ACTION/GATE nodes
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default)]
    pub success_node: Option<String>,
    #[serde(default)]
    pub failure_node: Option<String>,
    /// Ordered children for ROUTE/PARALLEL/LOOP nodes
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra attempts made after a non-successful action outcome
    #[serde(default)]
    pub max_retries: u32,
    /// Iteration cap for LOOP nodes
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// An ACTION with this flag is gated exactly like a GATE
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DecisionNode {
    fn blank<S: Into<String>>(id: S, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            description: String::new(),
            condition: None,
            action: None,
            parameters: Params::new(),
            success_node: None,
            failure_node: None,
            children: Vec::new(),
            timeout_ms: None,
            max_retries: 0,
            max_iterations: None,
            requires_approval: false,
            priority: 0,
            tags: Vec::new(),
        }
    }

    pub fn condition<S: Into<String>>(id: S, condition: Condition) -> Self {
        let mut node = Self::blank(id, NodeType::Condition);
        node.condition = Some(condition);
        node
    }

    pub fn action<S: Into<String>, A: Into<String>>(id: S, action: A) -> Self {
        let mut node = Self::blank(id, NodeType::Action);
        node.action = Some(action.into());
        node
    }

    pub fn gate<S: Into<String>, A: Into<String>>(id: S, action: A) -> Self {
        let mut node = Self::blank(id, NodeType::Gate);
        node.action = Some(action.into());
        node.requires_approval = true;
        node
    }

    pub fn route<S: Into<String>>(id: S, children: &[&str]) -> Self {
        Self::with_children(id, NodeType::Route, children)
    }

    pub fn parallel<S: Into<String>>(id: S, children: &[&str]) -> Self {
        Self::with_children(id, NodeType::Parallel, children)
    }

    /// A LOOP node over the given children
    pub fn repeat<S: Into<String>>(id: S, children: &[&str]) -> Self {
        Self::with_children(id, NodeType::Loop, children)
    }

    fn with_children<S: Into<String>>(id: S, node_type: NodeType, children: &[&str]) -> Self {
        let mut node = Self::blank(id, node_type);
        node.children = children.iter().map(|c| c.to_string()).collect();
        node
    }

    pub fn on_success<S: Into<String>>(mut self, node_id: S) -> Self {
        self.success_node = Some(node_id.into());
        self
    }

    pub fn on_failure<S: Into<String>>(mut self, node_id: S) -> Self {
        self.failure_node = Some(node_id.into());
        self
    }

    pub fn describe<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param<K: Into<String>, V: Into<serde_json::Value>>(mut self, key: K, value: V) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// True for nodes that invoke an action executor
    pub fn is_action(&self) -> bool {
        matches!(self.node_type, NodeType::Action | NodeType::Gate)
    }

    /// True when the node's action must wait for human approval
    pub fn needs_approval(&self) -> bool {
        self.node_type == NodeType::Gate || (self.node_type == NodeType::Action && self.requires_approval)
    }

    /// Every node id this node points at, in declaration order
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::with_capacity(self.children.len() + 2);
        if let Some(next) = &self.success_node {
            refs.push(next);
        }
        if let Some(next) = &self.failure_node {
            refs.push(next);
        }
        refs.extend(self.children.iter().map(String::as_str));
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_builder() {
        let node = DecisionNode::action("restart", "restart_service")
            .with_param("service", "orders-api")
            .with_retries(2)
            .with_timeout(Duration::from_secs(30))
            .on_success("verify")
            .on_failure("escalate");

        assert!(node.is_action());
        assert!(!node.needs_approval());
        assert_eq!(node.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(node.references(), vec!["verify", "escalate"]);
        assert_eq!(node.parameters["service"], "orders-api");
    }

    #[test]
    fn test_gate_and_flagged_action_need_approval() {
        assert!(DecisionNode::gate("g", "failover_database").needs_approval());
        assert!(DecisionNode::action("a", "wipe_cache").with_approval().needs_approval());
    }

    #[test]
    fn test_container_references() {
        let node = DecisionNode::parallel("fan_out", &["a", "b"]).on_success("done");
        assert_eq!(node.references(), vec!["done", "a", "b"]);
        assert!(!node.is_action());
    }
}

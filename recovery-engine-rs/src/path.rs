//! # Decision Paths
//!
//! The audit trace produced by one strategy execution against one failure:
//! nodes visited, actions attempted, approvals requested, the reasoning
//! behind every branch and the final outcome.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

/// Terminal outcome of a recovery walk (and of individual action invocations)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionResult {
    Success,
    Failure,
    RequiresApproval,
    EscalationNeeded,
    ManualIntervention,
    PartialSuccess,
    Timeout,
    Cancelled,
}

impl DecisionResult {
    /// Returns true for outcomes that count as a successful recovery
    pub fn is_success(&self) -> bool {
        matches!(self, DecisionResult::Success | DecisionResult::PartialSuccess)
    }

    /// Which branch a node with this outcome follows.
    ///
    /// `None` means the outcome halts the walk outright.
    pub fn branch(&self) -> Option<bool> {
        match self {
            DecisionResult::Success | DecisionResult::PartialSuccess => Some(true),
            DecisionResult::Failure | DecisionResult::Timeout => Some(false),
            DecisionResult::RequiresApproval
            | DecisionResult::EscalationNeeded
            | DecisionResult::ManualIntervention
            | DecisionResult::Cancelled => None,
        }
    }

    pub fn halts_walk(&self) -> bool {
        self.branch().is_none()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionResult::Success => "SUCCESS",
            DecisionResult::Failure => "FAILURE",
            DecisionResult::RequiresApproval => "REQUIRES_APPROVAL",
            DecisionResult::EscalationNeeded => "ESCALATION_NEEDED",
            DecisionResult::ManualIntervention => "MANUAL_INTERVENTION",
            DecisionResult::PartialSuccess => "PARTIAL_SUCCESS",
            DecisionResult::Timeout => "TIMEOUT",
            DecisionResult::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for DecisionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation (or simulation) of an ACTION/GATE node's action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub node_id: String,
    pub action: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    /// Number of executor calls made, including retries
    pub attempts: u32,
    pub result: DecisionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Approved,
    Denied,
    TimedOut,
    /// Dry runs never wait for approval
    Skipped,
}

/// Audit entry for an approval requested during the walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Gate node id, or the strategy id for strategy-level oversight
    pub subject: String,
    pub requested_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
}

/// Mutable scratch trace filled in by the interpreter.
///
/// Parallel branches each write into their own trace which is merged back
/// into the parent once every branch has joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathTrace {
    pub nodes_visited: Vec<String>,
    pub actions_taken: Vec<ActionRecord>,
    pub approvals: Vec<ApprovalRecord>,
    pub decision_reasoning: Vec<String>,
    /// Gate node whose approval timed out, if any
    pub suspended_at: Option<String>,
    /// Executor call still running; recorded if the walk is interrupted
    pub in_flight: Option<ActionRecord>,
}

impl PathTrace {
    pub fn visit(&mut self, node_id: &str) {
        self.nodes_visited.push(node_id.to_string());
    }

    pub fn reason<S: Into<String>>(&mut self, line: S) {
        self.decision_reasoning.push(line.into());
    }

    pub fn start_action(&mut self, record: ActionRecord) {
        self.in_flight = Some(record);
    }

    pub fn record_action(&mut self, record: ActionRecord) {
        self.in_flight = None;
        self.actions_taken.push(record);
    }

    /// Records the in-flight call, if any, as a TIMEOUT cut short by `reason`
    pub fn interrupt(&mut self, reason: &str) -> Option<&ActionRecord> {
        let mut record = self.in_flight.take()?;
        record.duration_ms = (Utc::now() - record.started_at).num_milliseconds().max(0) as f64;
        record.result = DecisionResult::Timeout;
        record.message = Some(reason.to_string());
        self.actions_taken.push(record);
        self.actions_taken.last()
    }

    pub fn record_approval(&mut self, record: ApprovalRecord) {
        self.approvals.push(record);
    }

    pub fn suspend(&mut self, node_id: &str) {
        if self.suspended_at.is_none() {
            self.suspended_at = Some(node_id.to_string());
        }
    }

    /// Appends another trace after this one
    pub fn merge(&mut self, other: PathTrace) {
        if self.suspended_at.is_none() {
            self.suspended_at = other.suspended_at;
        }
        self.nodes_visited.extend(other.nodes_visited);
        self.actions_taken.extend(other.actions_taken);
        self.approvals.extend(other.approvals);
        self.decision_reasoning.extend(other.decision_reasoning);
    }
}

/// Recorded trace of one strategy execution against one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPath {
    pub path_id: Uuid,
    pub failure_id: String,
    #[serde(default)]
    pub strategy_id: Option<String>,
    pub dry_run: bool,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub nodes_visited: Vec<String>,
    pub actions_taken: Vec<ActionRecord>,
    #[serde(default)]
    pub approvals: Vec<ApprovalRecord>,
    pub decision_reasoning: Vec<String>,
    pub final_result: Option<DecisionResult>,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Gate node that suspended the run awaiting approval
    #[serde(default)]
    pub suspended_at: Option<String>,
    pub total_execution_time_ms: f64,
    pub actions_successful: u32,
    pub actions_failed: u32,
}

impl DecisionPath {
    /// Opens a new path, timestamped now
    pub fn new<S: Into<String>>(failure_id: S, dry_run: bool) -> Self {
        Self {
            path_id: Uuid::new_v4(),
            failure_id: failure_id.into(),
            strategy_id: None,
            dry_run,
            start_time: Utc::now(),
            end_time: None,
            nodes_visited: Vec::new(),
            actions_taken: Vec::new(),
            approvals: Vec::new(),
            decision_reasoning: Vec::new(),
            final_result: None,
            success: false,
            error_message: None,
            suspended_at: None,
            total_execution_time_ms: 0.0,
            actions_successful: 0,
            actions_failed: 0,
        }
    }

    pub fn reason<S: Into<String>>(&mut self, line: S) {
        self.decision_reasoning.push(line.into());
    }

    pub fn is_finished(&self) -> bool {
        self.final_result.is_some()
    }

    /// Folds an interpreter trace into the path, updating action counters
    pub fn absorb(&mut self, trace: PathTrace) {
        for record in &trace.actions_taken {
            if record.result.is_success() {
                self.actions_successful += 1;
            } else {
                self.actions_failed += 1;
            }
        }
        if self.suspended_at.is_none() {
            self.suspended_at = trace.suspended_at;
        }
        self.nodes_visited.extend(trace.nodes_visited);
        self.actions_taken.extend(trace.actions_taken);
        self.approvals.extend(trace.approvals);
        self.decision_reasoning.extend(trace.decision_reasoning);
    }

    /// Sets the final result exactly once and stamps the end time.
    ///
    /// Returns false (and leaves the path untouched) if the path was already
    /// finished.
    pub fn finish(&mut self, result: DecisionResult, error_message: Option<String>) -> bool {
        if let Some(existing) = self.final_result {
            warn!(
                path_id = %self.path_id,
                existing = %existing,
                attempted = %result,
                "Ignoring second attempt to finish decision path"
            );
            return false;
        }

        let end = Utc::now();
        self.final_result = Some(result);
        self.success = result.is_success();
        if error_message.is_some() {
            self.error_message = error_message;
        }
        self.total_execution_time_ms = (end - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        self.end_time = Some(end);
        true
    }

    /// Number of ACTION/GATE entries in `nodes_visited`, given a lookup of
    /// which node ids are action-bearing
    pub fn action_nodes_visited<F>(&self, is_action_node: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.nodes_visited.iter().filter(|id| is_action_node(id)).count()
    }

    /// Parses a JSON export back into a path
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

//! # Tree Interpreter
//!
//! Walks a strategy's decision graph for one failure, invoking executors,
//! evaluating predicates and asking for approvals as it goes, and records
//! every step into a [`PathTrace`].
//!
//! Per-node problems (a predicate that errors, an executor that errors,
//! panics or overruns its deadline) are contained at the node and turned into
//! a FAILURE or TIMEOUT branch. Graph problems (a missing node, a depth
//! overrun, a ROUTE with no children) abort the walk; [`TreeInterpreter::run`]
//! catches them and finishes the path with FAILURE.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actions::{ActionExecutor, ActionExecutorRegistry, ActionOutcome};
use crate::approval::{ApprovalDecision, ApprovalHandler, ApprovalRequest};
use crate::conditions::{Condition, ConditionRegistry, Params};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::failure::CategorizedFailure;
use crate::node::{DecisionNode, NodeType};
use crate::path::{ActionRecord, ApprovalRecord, ApprovalStatus, DecisionPath, DecisionResult, PathTrace};
use crate::retry::RetryPolicy;
use crate::strategy::RecoveryStrategy;

/// Limits the interpreter applies to every walk
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterSettings {
    pub max_depth: usize,
    /// Executor deadline for nodes without their own timeout
    pub default_timeout: Duration,
    /// Approval wait for gates without their own timeout
    pub approval_timeout: Duration,
    pub default_loop_iterations: u32,
    pub retry_policy: RetryPolicy,
    pub notification_targets: Vec<String>,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for InterpreterSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            default_timeout: config.default_timeout(),
            approval_timeout: config.approval_timeout(),
            default_loop_iterations: config.default_loop_iterations,
            retry_policy: config.retry_policy(),
            notification_targets: config.notification_targets.clone(),
        }
    }
}

/// Read-only state shared by every step of one walk
struct WalkContext<'a> {
    strategy: &'a RecoveryStrategy,
    failure: &'a CategorizedFailure,
    path_id: Uuid,
    dry_run: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl WalkContext<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |rx| *rx.borrow())
    }
}

/// Result of one approval request
enum Approval {
    Granted,
    Denied,
    TimedOut,
}

/// Walks decision graphs against failures
#[derive(Clone)]
pub struct TreeInterpreter {
    actions: Arc<ActionExecutorRegistry>,
    conditions: Arc<ConditionRegistry>,
    approvals: Arc<dyn ApprovalHandler>,
    settings: InterpreterSettings,
}

impl TreeInterpreter {
    pub fn new(
        actions: Arc<ActionExecutorRegistry>,
        conditions: Arc<ConditionRegistry>,
        approvals: Arc<dyn ApprovalHandler>,
        settings: InterpreterSettings,
    ) -> Self {
        Self {
            actions,
            conditions,
            approvals,
            settings,
        }
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    /// Runs `strategy` against `failure`, filling and finishing `path`.
    ///
    /// Never fails: graph errors, the strategy deadline and cancellation all
    /// end up as the path's final result.
    pub async fn run(
        &self,
        strategy: &RecoveryStrategy,
        failure: &CategorizedFailure,
        path: &mut DecisionPath,
        cancel: Option<watch::Receiver<bool>>,
    ) {
        let ctx = WalkContext {
            strategy,
            failure,
            path_id: path.path_id,
            dry_run: path.dry_run,
            cancel,
        };
        let mut trace = PathTrace::default();
        let deadline = strategy.max_execution_time();

        let outcome = tokio::time::timeout(deadline, self.walk_strategy(&ctx, &mut trace)).await;

        let (result, error_message) = match outcome {
            Ok(Ok(result)) => (result, None),
            Ok(Err(e)) => {
                error!(
                    path_id = %path.path_id,
                    strategy = %strategy.id,
                    error = %e,
                    "Decision walk aborted"
                );
                trace.reason(format!("Walk aborted: {}", e));
                (DecisionResult::Failure, Some(e.to_string()))
            }
            Err(_) => {
                warn!(
                    path_id = %path.path_id,
                    strategy = %strategy.id,
                    deadline_secs = deadline.as_secs(),
                    "Strategy exceeded its maximum execution time"
                );
                let message = format!(
                    "strategy '{}' exceeded its maximum execution time of {}s",
                    strategy.id,
                    deadline.as_secs()
                );
                if let Some(record) = trace.interrupt("interrupted by the strategy deadline") {
                    warn!(path_id = %path.path_id, node = %record.node_id, action = %record.action, "Action interrupted");
                }
                if let Some(node_id) = trace.nodes_visited.last().cloned() {
                    trace.reason(format!("Interrupted while running node '{}'", node_id));
                }
                trace.reason(format!("Stopped: {}", message));
                (DecisionResult::Timeout, Some(message))
            }
        };

        path.absorb(trace);
        path.finish(result, error_message);
    }

    async fn walk_strategy(&self, ctx: &WalkContext<'_>, trace: &mut PathTrace) -> Result<DecisionResult> {
        let strategy = ctx.strategy;
        trace.reason(format!(
            "Executing strategy '{}' from root '{}'{}",
            strategy.id,
            strategy.root_node_id,
            if ctx.dry_run { " (dry run)" } else { "" }
        ));

        if strategy.requires_human_oversight {
            if ctx.dry_run {
                trace.reason("Strategy requires human oversight; skipped in dry run");
                trace.record_approval(ApprovalRecord {
                    subject: strategy.id.clone(),
                    requested_at: Utc::now(),
                    status: ApprovalStatus::Skipped,
                    approver: None,
                });
            } else {
                let description = format!("Run strategy '{}' ({})", strategy.id, strategy.name);
                match self
                    .request_approval(ctx, &strategy.id, None, &Params::new(), description, None, trace)
                    .await
                {
                    Approval::Granted => {}
                    Approval::Denied => return Ok(DecisionResult::ManualIntervention),
                    Approval::TimedOut => {
                        trace.suspend(&strategy.root_node_id);
                        return Ok(DecisionResult::RequiresApproval);
                    }
                }
            }
        }

        self.walk(ctx, &strategy.root_node_id, 0, trace).await
    }

    fn walk<'a>(
        &'a self,
        ctx: &'a WalkContext<'a>,
        node_id: &'a str,
        depth: usize,
        trace: &'a mut PathTrace,
    ) -> BoxFuture<'a, Result<DecisionResult>> {
        async move {
            if depth > self.settings.max_depth {
                return Err(Error::DepthExceeded {
                    node_id: node_id.to_string(),
                    limit: self.settings.max_depth,
                });
            }
            if ctx.is_cancelled() {
                trace.reason(format!("Cancelled before node '{}'", node_id));
                return Ok(DecisionResult::Cancelled);
            }

            let node = ctx.strategy.node(node_id).ok_or_else(|| Error::NodeNotFound {
                strategy_id: ctx.strategy.id.clone(),
                node_id: node_id.to_string(),
            })?;
            trace.visit(&node.id);
            debug!(
                path_id = %ctx.path_id,
                node = %node.id,
                node_type = %node.node_type,
                depth,
                "Visiting node"
            );

            match node.node_type {
                NodeType::Condition => {
                    let holds = match &node.condition {
                        Some(condition) => self.check(ctx, node, condition, trace),
                        None => {
                            trace.reason(format!("Condition '{}' has no predicate; treated as false", node.id));
                            false
                        }
                    };
                    let outcome = if holds {
                        DecisionResult::Success
                    } else {
                        DecisionResult::Failure
                    };
                    self.follow(ctx, node, outcome, depth, trace).await
                }
                NodeType::Action | NodeType::Gate => {
                    let outcome = self.run_action(ctx, node, trace).await;
                    self.follow(ctx, node, outcome, depth, trace).await
                }
                NodeType::Route => {
                    let first = node
                        .children
                        .first()
                        .ok_or_else(|| Error::EmptyRoute(node.id.clone()))?;
                    trace.reason(format!("Route '{}' forwards to '{}'", node.id, first));
                    self.walk(ctx, first, depth + 1, trace).await
                }
                NodeType::Parallel => {
                    let outcome = self.run_parallel(ctx, node, depth, trace).await?;
                    if outcome.halts_walk() {
                        return Ok(outcome);
                    }
                    self.follow(ctx, node, outcome, depth, trace).await
                }
                NodeType::Loop => {
                    let outcome = self.run_loop(ctx, node, depth, trace).await?;
                    self.follow(ctx, node, outcome, depth, trace).await
                }
            }
        }
        .boxed()
    }

    /// Moves on from `node` according to `outcome`.
    ///
    /// Halting outcomes stop the walk; otherwise the matching pointer is
    /// followed, and an absent pointer ends the walk with `outcome`.
    async fn follow(
        &self,
        ctx: &WalkContext<'_>,
        node: &DecisionNode,
        outcome: DecisionResult,
        depth: usize,
        trace: &mut PathTrace,
    ) -> Result<DecisionResult> {
        let took_success = match outcome.branch() {
            Some(took_success) => took_success,
            None => {
                trace.reason(format!("Node '{}' returned {}; halting", node.id, outcome));
                return Ok(outcome);
            }
        };

        let next = if took_success {
            node.success_node.as_deref()
        } else {
            node.failure_node.as_deref()
        };
        let branch = if took_success { "success" } else { "failure" };

        match next {
            Some(next) => {
                trace.reason(format!(
                    "Node '{}' returned {}; taking {} branch to '{}'",
                    node.id, outcome, branch, next
                ));
                self.walk(ctx, next, depth + 1, trace).await
            }
            None => {
                trace.reason(format!(
                    "Node '{}' returned {}; no {} branch, finishing",
                    node.id, outcome, branch
                ));
                Ok(outcome)
            }
        }
    }

    /// Evaluates a predicate; errors are logged and read as false
    fn check(&self, ctx: &WalkContext<'_>, node: &DecisionNode, condition: &Condition, trace: &mut PathTrace) -> bool {
        let description = condition.describe();
        if ctx.dry_run {
            trace.reason(format!("[dry run] '{}': {} assumed true", node.id, description));
            return true;
        }

        match condition.evaluate(ctx.failure, &self.conditions) {
            Ok(holds) => {
                trace.reason(format!("'{}': {} is {}", node.id, description, holds));
                holds
            }
            Err(e) => {
                warn!(
                    path_id = %ctx.path_id,
                    node = %node.id,
                    error = %e,
                    "Condition evaluation failed; treating as false"
                );
                trace.reason(format!("'{}': {} could not be evaluated ({}); treated as false", node.id, description, e));
                false
            }
        }
    }

    async fn run_action(&self, ctx: &WalkContext<'_>, node: &DecisionNode, trace: &mut PathTrace) -> DecisionResult {
        let action = match node.action.as_deref() {
            Some(action) => action,
            None => {
                trace.reason(format!("{} node '{}' names no action", node.node_type, node.id));
                return DecisionResult::Failure;
            }
        };

        if node.needs_approval() {
            if ctx.dry_run {
                trace.reason(format!("[dry run] approval for '{}' skipped", node.id));
                trace.record_approval(ApprovalRecord {
                    subject: node.id.clone(),
                    requested_at: Utc::now(),
                    status: ApprovalStatus::Skipped,
                    approver: None,
                });
            } else {
                let description = if node.description.is_empty() {
                    format!("Run action '{}' at node '{}'", action, node.id)
                } else {
                    node.description.clone()
                };
                match self
                    .request_approval(ctx, &node.id, Some(action), &node.parameters, description, node.timeout(), trace)
                    .await
                {
                    Approval::Granted => {}
                    Approval::Denied => return DecisionResult::ManualIntervention,
                    Approval::TimedOut => {
                        trace.suspend(&node.id);
                        return DecisionResult::RequiresApproval;
                    }
                }
            }
        }

        let started_at = Utc::now();
        let mut record = ActionRecord {
            node_id: node.id.clone(),
            action: action.to_string(),
            parameters: node.parameters.clone(),
            dry_run: ctx.dry_run,
            started_at,
            duration_ms: 0.0,
            attempts: 0,
            result: DecisionResult::Success,
            message: None,
        };

        if ctx.dry_run {
            record.message = Some("simulated".to_string());
            trace.reason(format!("[dry run] action '{}' at '{}' simulated as SUCCESS", action, node.id));
            trace.record_action(record);
            return DecisionResult::Success;
        }

        let executor = match self.actions.get(action) {
            Some(executor) => executor,
            None => {
                warn!(path_id = %ctx.path_id, node = %node.id, action, "No executor registered for action");
                let message = format!("no executor registered for action '{}'", action);
                trace.reason(format!("Action '{}' at '{}' failed: {}", action, node.id, message));
                record.result = DecisionResult::Failure;
                record.message = Some(message);
                trace.record_action(record);
                return DecisionResult::Failure;
            }
        };

        let deadline = node.timeout().unwrap_or(self.settings.default_timeout);
        let clock = Instant::now();
        let mut outcome = ActionOutcome::from(false);
        trace.start_action(record.clone());

        for attempt in 0..=node.max_retries {
            if attempt > 0 {
                let delay = self.settings.retry_policy.calculate_backoff(attempt - 1);
                debug!(node = %node.id, attempt, delay_ms = delay.as_millis() as u64, "Retrying action");
                trace.reason(format!(
                    "Retrying '{}' (attempt {} of {}) after {} ms",
                    node.id,
                    attempt + 1,
                    node.max_retries + 1,
                    delay.as_millis()
                ));
                tokio::time::sleep(delay).await;
            }

            record.attempts = attempt + 1;
            if let Some(in_flight) = trace.in_flight.as_mut() {
                in_flight.attempts = record.attempts;
            }
            outcome = self.invoke(executor.as_ref(), node, ctx, deadline).await;
            counter!("recovery.actions.executed", 1, "action" => action.to_string());

            // Only plain failures are worth another attempt
            if outcome.result.branch() != Some(false) {
                break;
            }
        }

        record.duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
        record.result = outcome.result;
        record.message = outcome.message.clone();

        info!(
            path_id = %ctx.path_id,
            node = %node.id,
            action,
            result = %outcome.result,
            attempts = record.attempts,
            duration_ms = record.duration_ms,
            "Action finished"
        );
        trace.reason(match &outcome.message {
            Some(message) => format!(
                "Action '{}' at '{}' returned {} after {} attempt(s): {}",
                action, node.id, outcome.result, record.attempts, message
            ),
            None => format!(
                "Action '{}' at '{}' returned {} after {} attempt(s)",
                action, node.id, outcome.result, record.attempts
            ),
        });
        trace.record_action(record);

        outcome.result
    }

    /// One executor call under a deadline, with errors and panics contained
    async fn invoke(
        &self,
        executor: &dyn ActionExecutor,
        node: &DecisionNode,
        ctx: &WalkContext<'_>,
        deadline: Duration,
    ) -> ActionOutcome {
        let call = AssertUnwindSafe(executor.execute(&node.parameters, ctx.failure)).catch_unwind();

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => {
                warn!(path_id = %ctx.path_id, node = %node.id, error = %e, "Action executor returned an error");
                ActionOutcome::failure(format!("executor error: {:#}", e))
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(path_id = %ctx.path_id, node = %node.id, panic = %message, "Action executor panicked");
                ActionOutcome::failure(format!("executor panicked: {}", message))
            }
            Err(_) => {
                warn!(
                    path_id = %ctx.path_id,
                    node = %node.id,
                    deadline_ms = deadline.as_millis() as u64,
                    "Action executor exceeded its deadline"
                );
                ActionOutcome {
                    result: DecisionResult::Timeout,
                    message: Some(format!("no result within {} ms", deadline.as_millis())),
                    data: Params::new(),
                }
            }
        }
    }

    /// Asks the approval handler, bounded by the node or configured timeout
    #[allow(clippy::too_many_arguments)]
    async fn request_approval(
        &self,
        ctx: &WalkContext<'_>,
        subject: &str,
        action: Option<&str>,
        parameters: &Params,
        description: String,
        timeout: Option<Duration>,
        trace: &mut PathTrace,
    ) -> Approval {
        let wait = timeout.unwrap_or(self.settings.approval_timeout);
        let requested_at = Utc::now();
        let request = ApprovalRequest {
            request_id: Uuid::new_v4(),
            path_id: ctx.path_id,
            failure_id: ctx.failure.failure_id.clone(),
            strategy_id: ctx.strategy.id.clone(),
            subject: subject.to_string(),
            action: action.map(str::to_string),
            parameters: parameters.clone(),
            description,
            notify: self.settings.notification_targets.clone(),
            requested_at,
        };

        info!(path_id = %ctx.path_id, subject, wait_ms = wait.as_millis() as u64, "Requesting approval");

        let (approval, status, approver) = match tokio::time::timeout(wait, self.approvals.request_approval(request)).await {
            Ok(decision) => {
                let approver = decision.approver().map(str::to_string);
                match decision {
                    ApprovalDecision::Approved { .. } => {
                        trace.reason(format!("Approval for '{}' granted", subject));
                        (Approval::Granted, ApprovalStatus::Approved, approver)
                    }
                    ApprovalDecision::Denied { reason, .. } => {
                        trace.reason(format!(
                            "Approval for '{}' denied{}; manual intervention required",
                            subject,
                            reason.map(|r| format!(" ({})", r)).unwrap_or_default()
                        ));
                        (Approval::Denied, ApprovalStatus::Denied, approver)
                    }
                }
            }
            Err(_) => {
                warn!(path_id = %ctx.path_id, subject, "Approval timed out; suspending run");
                counter!("recovery.approvals.timeout", 1);
                trace.reason(format!(
                    "No approval for '{}' within {} ms; suspending",
                    subject,
                    wait.as_millis()
                ));
                (Approval::TimedOut, ApprovalStatus::TimedOut, None)
            }
        };

        trace.record_approval(ApprovalRecord {
            subject: subject.to_string(),
            requested_at,
            status,
            approver,
        });
        approval
    }

    /// Runs every child branch concurrently and aggregates their results.
    ///
    /// A graph error in any branch aborts the whole walk; the first one
    /// stops the remaining branches.
    async fn run_parallel(
        &self,
        ctx: &WalkContext<'_>,
        node: &DecisionNode,
        depth: usize,
        trace: &mut PathTrace,
    ) -> Result<DecisionResult> {
        trace.reason(format!(
            "Parallel '{}' running {} branches: {}",
            node.id,
            node.children.len(),
            node.children.join(", ")
        ));

        let mut branch_traces: Vec<PathTrace> = node.children.iter().map(|_| PathTrace::default()).collect();
        let joined = try_join_all(node.children.iter().zip(branch_traces.iter_mut()).map(
            |(child, branch_trace)| async move {
                match self.walk(ctx, child, depth + 1, branch_trace).await {
                    Err(e) if !e.is_graph_error() => {
                        warn!(path_id = %ctx.path_id, node = %node.id, branch = %child, error = %e, "Parallel branch aborted");
                        branch_trace.reason(format!("Branch '{}' of '{}' aborted: {}", child, node.id, e));
                        Ok(DecisionResult::Failure)
                    }
                    other => other,
                }
            },
        ))
        .await;

        for branch_trace in branch_traces {
            trace.merge(branch_trace);
        }
        let results = joined?;

        let mut succeeded = 0usize;
        let mut halted = None;
        for result in results {
            if result.halts_walk() {
                if halted.is_none() {
                    halted = Some(result);
                }
            } else if result.is_success() {
                succeeded += 1;
            }
        }

        let outcome = match halted {
            Some(result) => result,
            None if succeeded > 0 => DecisionResult::Success,
            None => DecisionResult::Failure,
        };
        trace.reason(format!(
            "Parallel '{}': {} of {} branches succeeded; result {}",
            node.id,
            succeeded,
            node.children.len(),
            outcome
        ));
        Ok(outcome)
    }

    /// Repeats the children until the exit condition holds or the cap is hit
    async fn run_loop(
        &self,
        ctx: &WalkContext<'_>,
        node: &DecisionNode,
        depth: usize,
        trace: &mut PathTrace,
    ) -> Result<DecisionResult> {
        let max_iterations = node.max_iterations.unwrap_or(self.settings.default_loop_iterations);

        for iteration in 1..=max_iterations {
            for child in &node.children {
                let result = self.walk(ctx, child, depth + 1, trace).await?;
                if result != DecisionResult::Success {
                    trace.reason(format!(
                        "Loop '{}' iteration {}: '{}' returned {}; leaving loop",
                        node.id, iteration, child, result
                    ));
                    return Ok(result);
                }
            }

            match &node.condition {
                Some(condition) => {
                    if self.check(ctx, node, condition, trace) {
                        trace.reason(format!("Loop '{}' exit condition met after {} iteration(s)", node.id, iteration));
                        return Ok(DecisionResult::Success);
                    }
                }
                None => trace.reason(format!("Loop '{}' iteration {} complete", node.id, iteration)),
            }
        }

        if node.condition.is_some() {
            trace.reason(format!(
                "Loop '{}' exhausted {} iteration(s) without meeting its exit condition",
                node.id, max_iterations
            ));
            Ok(DecisionResult::Failure)
        } else {
            Ok(DecisionResult::Success)
        }
    }
}

impl std::fmt::Debug for TreeInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeInterpreter")
            .field("actions", &self.actions)
            .field("conditions", &self.conditions)
            .field("settings", &self.settings)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

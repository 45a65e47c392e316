//! Node-level behaviour exercised through caller-supplied strategies

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{api_errors, fast_config, CountingExecutor, SlowExecutor};
use recovery_engine::{
    ActionExecutorRegistry, ActionOutcome, ApprovalDecision, ApprovalStatus, ChannelApprovalHandler, Condition,
    ConditionRegistry, DecisionNode, DecisionPath, DecisionResult, EngineConfig, RecoveryEngine, RecoveryStrategy,
};

fn engine_with(actions: ActionExecutorRegistry) -> RecoveryEngine {
    RecoveryEngine::builder()
        .config(fast_config())
        .actions(actions)
        .build()
        .unwrap()
}

async fn run(engine: &RecoveryEngine, strategy: &RecoveryStrategy) -> DecisionPath {
    engine.execute(&api_errors(), Some(strategy), false).await
}

fn gated() -> RecoveryStrategy {
    RecoveryStrategy::builder("gated", "Gated failover")
        .node(
            DecisionNode::gate("approve", "failover_database")
                .on_success("verify")
                .on_failure("escalate"),
        )
        .node(DecisionNode::action("verify", "verify_database_health"))
        .node(DecisionNode::action("escalate", "escalate_incident"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn gate_timeout_suspends_without_running_the_action() {
    let failover = CountingExecutor::new(ActionOutcome::success());
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .action("failover_database", failover.clone())
        .build()
        .unwrap();

    let path = run(&engine, &gated()).await;

    assert_eq!(path.final_result, Some(DecisionResult::RequiresApproval));
    assert!(!path.success);
    assert_eq!(path.suspended_at.as_deref(), Some("approve"));
    assert!(path.actions_taken.is_empty());
    assert_eq!(path.nodes_visited, vec!["approve"]);
    assert_eq!(path.approvals[0].status, ApprovalStatus::TimedOut);
    assert_eq!(failover.calls(), 0);
}

#[tokio::test]
async fn gate_runs_once_an_operator_approves() {
    let handler = Arc::new(ChannelApprovalHandler::new());
    let mut announcements = handler.subscribe();
    let failover = CountingExecutor::new(ActionOutcome::success());
    let engine = Arc::new(
        RecoveryEngine::builder()
            .config(EngineConfig {
                approval_timeout_ms: 5_000,
                notification_targets: vec!["#db-oncall".to_string()],
                ..fast_config()
            })
            .approval_handler(handler.clone())
            .action("failover_database", failover.clone())
            .action("verify_database_health", CountingExecutor::new(ActionOutcome::success()))
            .build()
            .unwrap(),
    );

    let run = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(&api_errors(), Some(&gated()), false).await })
    };

    let request = announcements.recv().await.unwrap();
    assert_eq!(request.subject, "approve");
    assert_eq!(request.action.as_deref(), Some("failover_database"));
    assert_eq!(request.notify, vec!["#db-oncall".to_string()]);
    assert!(handler.resolve(
        request.request_id,
        ApprovalDecision::Approved {
            approver: Some("oncall-dba".to_string())
        }
    ));

    let path = run.await.unwrap();
    assert_eq!(path.final_result, Some(DecisionResult::Success));
    assert_eq!(path.nodes_visited, vec!["approve", "verify"]);
    assert_eq!(path.approvals[0].status, ApprovalStatus::Approved);
    assert_eq!(path.approvals[0].approver.as_deref(), Some("oncall-dba"));
    assert_eq!(failover.calls(), 1);
}

#[tokio::test]
async fn gate_denial_requires_manual_intervention() {
    let handler = Arc::new(ChannelApprovalHandler::new());
    let mut announcements = handler.subscribe();
    let engine = Arc::new(
        RecoveryEngine::builder()
            .config(EngineConfig {
                approval_timeout_ms: 5_000,
                ..fast_config()
            })
            .approval_handler(handler.clone())
            .build()
            .unwrap(),
    );

    let run = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(&api_errors(), Some(&gated()), false).await })
    };
    let request = announcements.recv().await.unwrap();
    handler.resolve(request.request_id, ApprovalDecision::deny("replica is lagging"));

    let path = run.await.unwrap();
    assert_eq!(path.final_result, Some(DecisionResult::ManualIntervention));
    assert_eq!(path.approvals[0].status, ApprovalStatus::Denied);
    assert!(path.actions_taken.is_empty());
    assert!(path.suspended_at.is_none());
}

#[tokio::test]
async fn dry_run_skips_gate_approval() {
    let engine = engine_with(ActionExecutorRegistry::new());
    let path = engine.execute(&api_errors(), Some(&gated()), true).await;

    assert_eq!(path.final_result, Some(DecisionResult::Success));
    assert_eq!(path.approvals[0].status, ApprovalStatus::Skipped);
    assert!(path.actions_taken.iter().all(|a| a.dry_run && a.duration_ms == 0.0));
}

#[tokio::test]
async fn oversight_strategy_waits_before_its_root() {
    let strategy = RecoveryStrategy::builder("overseen", "Needs a human")
        .human_oversight(true)
        .node(DecisionNode::action("restore", "restore_from_backup"))
        .build()
        .unwrap();
    let restore = CountingExecutor::new(ActionOutcome::success());
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .action("restore_from_backup", restore.clone())
        .build()
        .unwrap();

    let path = run(&engine, &strategy).await;
    assert_eq!(path.final_result, Some(DecisionResult::RequiresApproval));
    assert!(path.nodes_visited.is_empty());
    assert_eq!(path.suspended_at.as_deref(), Some("restore"));
    assert_eq!(restore.calls(), 0);
}

#[tokio::test]
async fn executor_errors_take_the_failure_branch() {
    let strategy = RecoveryStrategy::builder("erroring", "Executor errors")
        .node(DecisionNode::action("restart", "restart_service").on_failure("escalate"))
        .node(DecisionNode::action("escalate", "escalate_incident"))
        .build()
        .unwrap();
    let mut actions = ActionExecutorRegistry::new();
    actions
        .register_fn("restart_service", |_, _| Err(anyhow::anyhow!("connection refused")))
        .register_fn("escalate_incident", |_, _| Ok(ActionOutcome::escalate("paged oncall")));

    let path = run(&engine_with(actions), &strategy).await;

    assert_eq!(path.nodes_visited, vec!["restart", "escalate"]);
    assert_eq!(path.actions_taken[0].result, DecisionResult::Failure);
    assert!(path.actions_taken[0]
        .message
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert_eq!(path.final_result, Some(DecisionResult::EscalationNeeded));
    assert_eq!(path.actions_failed, 2);
}

#[tokio::test]
async fn unregistered_action_is_a_failure_record() {
    let strategy = RecoveryStrategy::builder("unbound", "No executor")
        .node(DecisionNode::action("mystery", "not_registered"))
        .build()
        .unwrap();

    let path = run(&engine_with(ActionExecutorRegistry::new()), &strategy).await;
    assert_eq!(path.final_result, Some(DecisionResult::Failure));
    assert_eq!(path.actions_taken.len(), 1);
    assert_eq!(path.actions_taken[0].attempts, 0);
    assert!(path.actions_taken[0]
        .message
        .as_deref()
        .unwrap()
        .contains("no executor registered"));
}

#[tokio::test]
async fn hung_executor_times_out_at_its_deadline() {
    let strategy = RecoveryStrategy::builder("hung", "Hung executor")
        .node(
            DecisionNode::action("slow", "restart_service")
                .with_timeout(Duration::from_millis(30))
                .on_failure("fallback"),
        )
        .node(DecisionNode::action("fallback", "restart_load_balancer"))
        .node(DecisionNode::action("leaf", "restart_service").with_timeout(Duration::from_millis(30)))
        .build()
        .unwrap();
    let mut actions = ActionExecutorRegistry::new();
    actions
        .register("restart_service", SlowExecutor(Duration::from_secs(10)))
        .register_fn("restart_load_balancer", |_, _| Ok(true.into()));
    let engine = engine_with(actions);

    let path = run(&engine, &strategy).await;
    assert_eq!(path.actions_taken[0].result, DecisionResult::Timeout);
    assert_eq!(path.nodes_visited, vec!["slow", "fallback"]);
    assert_eq!(path.final_result, Some(DecisionResult::Success));

    // a timed-out leaf ends the walk with TIMEOUT
    let mut leaf_first = strategy.clone();
    leaf_first.root_node_id = "leaf".to_string();
    let path = run(&engine, &leaf_first).await;
    assert_eq!(path.final_result, Some(DecisionResult::Timeout));
}

#[tokio::test]
async fn failing_actions_are_retried() {
    let restart = CountingExecutor::new(ActionOutcome::failure("still unhealthy"));
    let strategy = RecoveryStrategy::builder("retrying", "Retries")
        .node(DecisionNode::action("restart", "restart_service").with_retries(2))
        .build()
        .unwrap();
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .action("restart_service", restart.clone())
        .build()
        .unwrap();

    let path = run(&engine, &strategy).await;
    assert_eq!(restart.calls(), 3);
    assert_eq!(path.actions_taken.len(), 1);
    assert_eq!(path.actions_taken[0].attempts, 3);
    assert_eq!(path.final_result, Some(DecisionResult::Failure));
}

#[tokio::test]
async fn escalations_are_not_retried() {
    let restart = CountingExecutor::new(ActionOutcome::escalate("needs a human"));
    let strategy = RecoveryStrategy::builder("no_retry", "Escalates")
        .node(DecisionNode::action("restart", "restart_service").with_retries(3))
        .build()
        .unwrap();
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .action("restart_service", restart.clone())
        .build()
        .unwrap();

    let path = run(&engine, &strategy).await;
    assert_eq!(restart.calls(), 1);
    assert_eq!(path.final_result, Some(DecisionResult::EscalationNeeded));
}

fn fan_out() -> RecoveryStrategy {
    RecoveryStrategy::builder("fan_out", "Parallel mitigation")
        .node(
            DecisionNode::parallel("mitigate", &["scale", "flush"])
                .on_success("verify")
                .on_failure("escalate"),
        )
        .node(DecisionNode::action("scale", "scale_resources"))
        .node(DecisionNode::action("flush", "clear_cache"))
        .node(DecisionNode::action("verify", "verify_resource_usage"))
        .node(DecisionNode::action("escalate", "escalate_incident"))
        .build()
        .unwrap()
}

fn fan_out_actions(scale: ActionOutcome, flush: ActionOutcome) -> ActionExecutorRegistry {
    let mut actions = ActionExecutorRegistry::new();
    actions
        .register("scale_resources", CountingExecutor::new(scale))
        .register("clear_cache", CountingExecutor::new(flush))
        .register_fn("verify_resource_usage", |_, _| Ok(true.into()))
        .register_fn("escalate_incident", |_, _| Ok(true.into()));
    actions
}

#[tokio::test]
async fn parallel_succeeds_when_any_branch_succeeds() {
    let engine = engine_with(fan_out_actions(ActionOutcome::failure("quota"), ActionOutcome::success()));
    let path = run(&engine, &fan_out()).await;

    assert_eq!(path.nodes_visited, vec!["mitigate", "scale", "flush", "verify"]);
    assert_eq!(path.actions_failed, 1);
    assert_eq!(path.final_result, Some(DecisionResult::Success));
}

#[tokio::test]
async fn parallel_fails_when_every_branch_fails() {
    let engine = engine_with(fan_out_actions(ActionOutcome::failure("quota"), ActionOutcome::from(false)));
    let path = run(&engine, &fan_out()).await;

    assert_eq!(path.nodes_visited.last().map(String::as_str), Some("escalate"));
}

#[tokio::test]
async fn parallel_halting_branch_wins() {
    let engine = engine_with(fan_out_actions(ActionOutcome::success(), ActionOutcome::manual("cache is pinned")));
    let path = run(&engine, &fan_out()).await;

    assert_eq!(path.final_result, Some(DecisionResult::ManualIntervention));
    assert_eq!(path.nodes_visited, vec!["mitigate", "scale", "flush"]);
}

#[tokio::test]
async fn parallel_branch_with_missing_node_fails_the_run() {
    let mut strategy = fan_out();
    if let Some(node) = strategy.nodes.get_mut("mitigate") {
        node.children.push("missing_branch".to_string());
    }
    let engine = engine_with(fan_out_actions(ActionOutcome::success(), ActionOutcome::success()));

    let path = run(&engine, &strategy).await;
    assert_eq!(path.final_result, Some(DecisionResult::Failure));
    assert!(!path.success);
    assert!(path.error_message.as_deref().unwrap().contains("missing_branch"));
    // branches that finished before the error keep their records
    assert_eq!(path.nodes_visited, vec!["mitigate", "scale", "flush"]);
    assert_eq!(path.actions_taken.len(), 2);
}

#[tokio::test]
async fn parallel_self_cycle_hits_depth_guard() {
    let strategy = RecoveryStrategy::builder("fan_cycle", "Fans out into itself")
        .node(DecisionNode::parallel("fan", &["fan", "fan", "fan"]))
        .build()
        .unwrap();
    let engine = engine_with(ActionExecutorRegistry::new());

    let path = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute(&api_errors(), Some(&strategy), true),
    )
    .await
    .expect("depth guard bounds the walk");

    assert_eq!(path.final_result, Some(DecisionResult::Failure));
    let error = path.error_message.as_deref().unwrap();
    assert!(error.contains("maximum decision depth 20"), "{}", error);
    assert_eq!(path.nodes_visited.len(), 21);
}

#[tokio::test]
async fn loop_stops_once_its_condition_holds() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let seen = evaluations.clone();
    let mut conditions = ConditionRegistry::new();
    conditions.register_fn("healthy", move |_, _| Ok(seen.fetch_add(1, Ordering::SeqCst) >= 1));

    let probe = CountingExecutor::new(ActionOutcome::success());
    let strategy = RecoveryStrategy::builder("probing", "Probe until healthy")
        .node(
            DecisionNode::repeat("until_healthy", &["probe"])
                .with_condition(Condition::custom("healthy"))
                .with_max_iterations(5),
        )
        .node(DecisionNode::action("probe", "check_service_health"))
        .build()
        .unwrap();
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .conditions(conditions)
        .action("check_service_health", probe.clone())
        .build()
        .unwrap();

    let path = run(&engine, &strategy).await;
    assert_eq!(probe.calls(), 2);
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
    assert_eq!(path.nodes_visited, vec!["until_healthy", "probe", "probe"]);
    assert_eq!(path.final_result, Some(DecisionResult::Success));
}

#[tokio::test]
async fn loop_ends_on_first_unsuccessful_child() {
    let probe = CountingExecutor::new(ActionOutcome::failure("503"));
    let strategy = RecoveryStrategy::builder("probing", "Probe")
        .node(DecisionNode::repeat("probe_loop", &["probe"]).with_max_iterations(4))
        .node(DecisionNode::action("probe", "check_service_health"))
        .build()
        .unwrap();
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .action("check_service_health", probe.clone())
        .build()
        .unwrap();

    let path = run(&engine, &strategy).await;
    assert_eq!(probe.calls(), 1);
    assert_eq!(path.final_result, Some(DecisionResult::Failure));
}

#[tokio::test]
async fn unknown_custom_condition_reads_as_false() {
    let strategy = RecoveryStrategy::builder("custom", "Custom predicate")
        .node(
            DecisionNode::condition("check", Condition::custom("not_registered"))
                .on_success("yes")
                .on_failure("no"),
        )
        .node(DecisionNode::action("yes", "a"))
        .node(DecisionNode::action("no", "b"))
        .build()
        .unwrap();
    let mut actions = ActionExecutorRegistry::new();
    actions
        .register_fn("a", |_, _| Ok(true.into()))
        .register_fn("b", |_, _| Ok(true.into()));

    let path = run(&engine_with(actions), &strategy).await;
    assert_eq!(path.nodes_visited, vec!["check", "no"]);
    assert!(path
        .decision_reasoning
        .iter()
        .any(|line| line.contains("could not be evaluated")));
}

#[tokio::test]
async fn strategy_deadline_ends_with_timeout() {
    let strategy = RecoveryStrategy::builder("slow", "Overruns")
        .max_execution_time(Duration::from_secs(1))
        .node(DecisionNode::action("slow", "restart_service").on_success("after"))
        .node(DecisionNode::action("after", "restart_service"))
        .build()
        .unwrap();
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .action("restart_service", SlowExecutor(Duration::from_secs(5)))
        .build()
        .unwrap();

    let path = run(&engine, &strategy).await;
    assert_eq!(path.final_result, Some(DecisionResult::Timeout));
    assert!(path
        .error_message
        .as_deref()
        .unwrap()
        .contains("maximum execution time"));
    assert_eq!(path.nodes_visited, vec!["slow"]);

    // the call cut short by the deadline is still on record
    assert_eq!(path.actions_taken.len(), 1);
    assert_eq!(path.actions_taken[0].node_id, "slow");
    assert_eq!(path.actions_taken[0].result, DecisionResult::Timeout);
    assert_eq!(path.actions_taken[0].attempts, 1);
    assert_eq!(path.actions_failed, 1);
    assert!(path
        .decision_reasoning
        .iter()
        .any(|line| line == "Interrupted while running node 'slow'"));
}

#[tokio::test]
async fn cancelled_run_stops_before_the_next_node() {
    let strategy = RecoveryStrategy::builder("cancellable", "Two steps")
        .node(DecisionNode::action("first", "drain_traffic").on_success("second"))
        .node(DecisionNode::action("second", "restart_service"))
        .build()
        .unwrap();
    let second = CountingExecutor::new(ActionOutcome::success());
    let engine = Arc::new(
        RecoveryEngine::builder()
            .config(fast_config())
            .action("drain_traffic", SlowExecutor(Duration::from_millis(300)))
            .action("restart_service", second.clone())
            .build()
            .unwrap(),
    );

    let run = {
        let engine = engine.clone();
        let strategy = strategy.clone();
        tokio::spawn(async move { engine.execute(&api_errors(), Some(&strategy), false).await })
    };

    let path_id = loop {
        if let Some(active) = engine.active_executions().first() {
            break active.path_id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(engine.cancel(path_id));

    let path = run.await.unwrap();
    assert_eq!(path.final_result, Some(DecisionResult::Cancelled));
    assert_eq!(path.nodes_visited, vec!["first"]);
    assert_eq!(path.actions_successful, 1);
    assert_eq!(second.calls(), 0);
    assert!(!engine.cancel(path_id));
}

//! End-to-end scenarios against the recovery engine's public API

mod common;

use std::sync::Arc;

use common::{api_errors, cache_pressure, database_outage, fast_config, succeeding_actions};
use recovery_engine::{
    ActionOutcome, CategorizedFailure, ComponentType, Condition, DecisionNode, DecisionPath, DecisionResult,
    EngineConfig, ExportFormat, FailureType, RecoveryEngine, RecoveryStrategy, Severity, StrategyCatalog,
};

fn engine() -> RecoveryEngine {
    RecoveryEngine::builder()
        .config(fast_config())
        .actions(succeeding_actions())
        .build()
        .unwrap()
}

/// Number of ACTION/GATE entries in the visited sequence
fn action_visits(path: &DecisionPath, strategy: &RecoveryStrategy) -> usize {
    path.action_nodes_visited(|id| strategy.node(id).map_or(false, |n| n.is_action()))
}

#[tokio::test]
async fn scenario_a_database_outage_dry_run() {
    let engine = engine();
    let path = engine.execute(&database_outage(), None, true).await;

    assert_eq!(path.strategy_id.as_deref(), Some("database_recovery"));
    assert_eq!(path.final_result, Some(DecisionResult::Success));
    assert!(path.success);
    assert_eq!(
        path.nodes_visited,
        vec!["assess_severity", "approve_failover", "verify_database"]
    );
    assert!(path.actions_taken.iter().all(|a| a.dry_run));
    assert_eq!(engine.rank(&database_outage())[0].strategy_id, "database_recovery");
}

#[tokio::test]
async fn scenario_b_type_and_severity_outrank_environment() {
    let typed = RecoveryStrategy::builder("typed", "Matches type and severity")
        .failure_types(&[FailureType::Network])
        .severities(&[Severity::Medium])
        .success_rate(0.4)
        .node(DecisionNode::action("reroute", "reroute_traffic"))
        .build()
        .unwrap();
    let by_env = RecoveryStrategy::builder("by_env", "Matches environment only")
        .environments(&["production"])
        .success_rate(0.4)
        .node(DecisionNode::action("restart", "restart_service"))
        .build()
        .unwrap();

    // registration order must not matter
    for order in [vec![by_env.clone(), typed.clone()], vec![typed.clone(), by_env.clone()]] {
        let engine = RecoveryEngine::builder()
            .catalog(StrategyCatalog::new(order).unwrap())
            .build()
            .unwrap();
        let failure = CategorizedFailure::new("inc-net", FailureType::Network, Severity::Medium)
            .with_environment("production");

        let ranking = engine.rank(&failure);
        assert_eq!(ranking[0].strategy_id, "typed");
        assert!((ranking[0].total - 5.4).abs() < 1e-9);
        assert!((ranking[1].total - 1.4).abs() < 1e-9);

        let path = engine.execute(&failure, None, true).await;
        assert_eq!(path.strategy_id.as_deref(), Some("typed"));
    }
}

#[tokio::test]
async fn unmatched_failure_yields_fixed_failure() {
    let engine = engine();
    let failure = CategorizedFailure::new("inc-x", FailureType::Unknown, Severity::Low).with_environment("lab");

    let path = engine.execute(&failure, None, false).await;
    assert!(!path.success);
    assert_eq!(path.final_result, Some(DecisionResult::Failure));
    assert!(path
        .error_message
        .as_deref()
        .unwrap()
        .contains("No matching recovery strategy found"));
    assert!(path.end_time.is_some());
}

#[tokio::test]
async fn dry_runs_are_deterministic() {
    let engine = engine();
    for failure in [database_outage(), cache_pressure(), api_errors()] {
        let first = engine.execute(&failure, None, true).await;
        let second = engine.execute(&failure, None, true).await;

        assert_eq!(first.nodes_visited, second.nodes_visited);
        assert_eq!(first.final_result, second.final_result);
        assert_ne!(first.path_id, second.path_id);
    }
}

#[tokio::test]
async fn parallel_dry_run_merges_branches_in_declared_order() {
    let engine = engine();
    let path = engine.execute(&cache_pressure(), None, true).await;

    assert_eq!(path.strategy_id.as_deref(), Some("resource_scaling"));
    assert_eq!(
        path.nodes_visited,
        vec!["relieve_pressure", "scale_out", "flush_cache", "verify_capacity"]
    );
    let actions: Vec<&str> = path.actions_taken.iter().map(|a| a.node_id.as_str()).collect();
    assert_eq!(actions, vec!["scale_out", "flush_cache", "verify_capacity"]);
}

#[tokio::test]
async fn cyclic_graph_hits_depth_guard() {
    let cyclic = RecoveryStrategy::builder("cyclic", "Ping-pong")
        .node(DecisionNode::condition("ping", Condition::Always { value: true }).on_success("pong"))
        .node(DecisionNode::condition("pong", Condition::Always { value: true }).on_success("ping"))
        .build()
        .unwrap();

    let engine = engine();
    let path = engine.execute(&database_outage(), Some(&cyclic), false).await;

    assert_eq!(path.final_result, Some(DecisionResult::Failure));
    let error = path.error_message.as_deref().unwrap();
    assert!(error.contains("maximum decision depth 20"), "{}", error);
    assert_eq!(path.nodes_visited.len(), 21);
    assert!(path.decision_reasoning.last().unwrap().starts_with("Walk aborted"));
}

#[tokio::test]
async fn dangling_reference_fails_without_crashing() {
    let broken = RecoveryStrategy::builder("broken", "Points nowhere")
        .node(DecisionNode::action("restart", "restart_service").on_success("ghost"))
        .build_unchecked();
    assert!(broken.validate().is_err());

    let engine = engine();
    let path = engine.execute(&api_errors(), Some(&broken), false).await;

    assert_eq!(path.final_result, Some(DecisionResult::Failure));
    assert!(path.error_message.as_deref().unwrap().contains("ghost"));
    assert_eq!(path.nodes_visited, vec!["restart"]);
    assert_eq!(path.actions_successful, 1);
}

#[tokio::test]
async fn dangling_reference_under_parallel_fails() {
    let broken = RecoveryStrategy::builder("broken_fan", "Fans out into nothing")
        .node(DecisionNode::parallel("fan", &["ok", "ghost"]))
        .node(DecisionNode::action("ok", "restart_service"))
        .build_unchecked();
    assert!(broken.validate().is_err());

    let engine = engine();
    for dry_run in [true, false] {
        let path = engine.execute(&api_errors(), Some(&broken), dry_run).await;

        assert_eq!(path.final_result, Some(DecisionResult::Failure));
        assert!(!path.success);
        assert!(path.error_message.as_deref().unwrap().contains("ghost"));
        assert_eq!(path.nodes_visited, vec!["fan", "ok"]);
    }
}

#[tokio::test]
async fn action_counters_never_exceed_action_visits() {
    let mut actions = succeeding_actions();
    actions.register_fn("restart_service", |_, _| Ok(ActionOutcome::failure("still down")));
    actions.register_fn("scale_resources", |_, _| Err(anyhow::anyhow!("quota exceeded")));
    let engine = RecoveryEngine::builder()
        .config(fast_config())
        .actions(actions)
        .build()
        .unwrap();

    for failure in [database_outage(), cache_pressure(), api_errors()] {
        for dry_run in [true, false] {
            let path = engine.execute(&failure, None, dry_run).await;
            let strategy = engine.catalog().get(path.strategy_id.as_deref().unwrap()).unwrap();

            let counted = (path.actions_successful + path.actions_failed) as usize;
            assert_eq!(counted, path.actions_taken.len());
            assert!(counted <= action_visits(&path, &strategy));
        }
    }
}

#[tokio::test]
async fn statistics_track_every_run() {
    let engine = engine();
    let unmatched = CategorizedFailure::new("inc-x", FailureType::Unknown, Severity::Low).with_environment("lab");
    let failures = [database_outage(), cache_pressure(), api_errors(), unmatched];

    let mut runs = 0u64;
    for failure in failures.iter().cycle().take(10) {
        engine.execute(failure, None, true).await;
        runs += 1;
    }

    let stats = engine.statistics();
    assert_eq!(stats.total_runs, runs);
    assert_eq!(stats.successful_runs + stats.failed_runs, runs);
    assert_eq!(stats.results.values().sum::<u64>(), runs);
    // the unmatched failure ran at positions 4 and 8
    assert_eq!(stats.failed_runs, 2);
    assert_eq!(stats.per_strategy["database_recovery"].total, 3);
    assert!((stats.per_strategy["database_recovery"].success_rate - 1.0).abs() < 1e-9);
    assert_eq!(engine.history().len(), 10);
}

#[tokio::test]
async fn json_export_round_trips() {
    let engine = engine();
    let path = engine.execute(&cache_pressure(), None, true).await;

    let json = engine.export(path.path_id, ExportFormat::Json).unwrap();
    let parsed = DecisionPath::from_json(&json).unwrap();

    assert_eq!(parsed.path_id, path.path_id);
    assert_eq!(parsed.failure_id, path.failure_id);
    assert_eq!(parsed.final_result, path.final_result);
    assert_eq!(parsed.actions_taken, path.actions_taken);
    assert!(json.contains("\"final_result\": \"SUCCESS\""));

    assert!("csv".parse::<ExportFormat>().is_err());
}

#[tokio::test]
async fn completed_paths_are_archived_as_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("paths.ndjson");
    let config = EngineConfig {
        archive_path: Some(archive.clone()),
        ..fast_config()
    };
    let engine = RecoveryEngine::builder()
        .config(config)
        .actions(succeeding_actions())
        .build()
        .unwrap();

    let first = engine.execute(&database_outage(), None, true).await;
    let second = engine.execute(&api_errors(), None, true).await;

    let contents = std::fs::read_to_string(&archive).unwrap();
    let ids: Vec<_> = contents
        .lines()
        .map(|line| DecisionPath::from_json(line).unwrap().path_id)
        .collect();
    assert_eq!(ids, vec![first.path_id, second.path_id]);
}

#[tokio::test]
async fn concurrent_recoveries_share_one_engine() {
    let engine = Arc::new(engine());

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let failure = CategorizedFailure::new(format!("inc-{}", i), FailureType::Resource, Severity::High)
                    .with_component(ComponentType::Cache);
                engine.execute(&failure, None, i % 2 == 0).await
            })
        })
        .collect();

    for handle in handles {
        let path = handle.await.unwrap();
        assert_eq!(path.final_result, Some(DecisionResult::Success));
    }

    let stats = engine.statistics();
    assert_eq!(stats.total_runs, 12);
    assert_eq!(stats.per_strategy["resource_scaling"].successful, 12);
    assert!(engine.active_executions().is_empty());
}

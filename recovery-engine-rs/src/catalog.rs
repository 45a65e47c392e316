//! # Strategy Catalog
//!
//! Immutable, validated collection of recovery strategies built once at
//! startup. Registration order is preserved because the selector uses it to
//! break score ties.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::conditions::Condition;
use crate::error::{Error, Result};
use crate::failure::{ComponentType, FailureType, Severity};
use crate::node::DecisionNode;
use crate::strategy::{DataSafety, RecoveryStrategy};

/// Read-only set of recovery strategies
#[derive(Debug, Clone, Default)]
pub struct StrategyCatalog {
    strategies: Vec<Arc<RecoveryStrategy>>,
    index: HashMap<String, usize>,
}

impl StrategyCatalog {
    /// Builds a catalog, validating every strategy and rejecting duplicate ids
    pub fn new(strategies: Vec<RecoveryStrategy>) -> Result<Self> {
        let mut catalog = Self::default();
        for strategy in strategies {
            strategy.validate()?;
            if catalog.index.contains_key(&strategy.id) {
                return Err(Error::DuplicateStrategy(strategy.id));
            }
            catalog
                .index
                .insert(strategy.id.clone(), catalog.strategies.len());
            catalog.strategies.push(Arc::new(strategy));
        }

        info!(strategies = catalog.strategies.len(), "Strategy catalog built");
        Ok(catalog)
    }

    /// The built-in remediation playbooks
    pub fn with_defaults() -> Result<Self> {
        Self::new(default_strategies()?)
    }

    pub fn get(&self, strategy_id: &str) -> Option<Arc<RecoveryStrategy>> {
        self.index
            .get(strategy_id)
            .and_then(|&i| self.strategies.get(i))
            .cloned()
    }

    /// Strategies in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecoveryStrategy>> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Every action id any catalogued strategy may invoke
    pub fn required_actions(&self) -> BTreeSet<String> {
        self.strategies
            .iter()
            .flat_map(|s| s.action_ids().into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    /// Every custom condition evaluator name referenced by the catalog
    pub fn required_conditions(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for strategy in &self.strategies {
            for node in strategy.nodes.values() {
                if let Some(condition) = &node.condition {
                    names.extend(condition.custom_names().into_iter().map(str::to_string));
                }
            }
        }
        names
    }
}

fn escalation(id: &str, team: &str) -> DecisionNode {
    DecisionNode::action(id, "escalate_incident")
        .describe("Hand the incident to a human responder")
        .with_param("team", team)
        .with_tag("escalation")
}

/// Built-in playbooks covering the most common failure classes
pub fn default_strategies() -> Result<Vec<RecoveryStrategy>> {
    let database = RecoveryStrategy::builder("database_recovery", "Database recovery")
        .description("Recycle connections, fail over to a replica when critical, verify health")
        .failure_types(&[FailureType::Data, FailureType::Resource])
        .severities(&[Severity::High, Severity::Critical])
        .components(&[ComponentType::Database])
        .environments(&["production", "staging"])
        .success_rate(0.80)
        .data_safety(DataSafety::Cautious)
        .estimated_duration(Duration::from_secs(600))
        .max_execution_time(Duration::from_secs(1800))
        .node(
            DecisionNode::condition(
                "assess_severity",
                Condition::SeverityAtLeast { severity: Severity::Critical },
            )
            .describe("Critical incidents go straight to failover")
            .on_success("approve_failover")
            .on_failure("restart_connections"),
        )
        .node(
            DecisionNode::action("restart_connections", "restart_database_connections")
                .with_retries(2)
                .on_success("verify_database")
                .on_failure("approve_failover"),
        )
        .node(
            DecisionNode::gate("approve_failover", "failover_database")
                .describe("Promote a replica; needs DBA sign-off")
                .with_param("target", "replica")
                .on_success("verify_database")
                .on_failure("escalate_dba"),
        )
        .node(DecisionNode::action("verify_database", "verify_database_health").on_failure("escalate_dba"))
        .node(escalation("escalate_dba", "dba"))
        .build()?;

    let service = RecoveryStrategy::builder("service_restart", "Service restart")
        .description("Restart the failing service gracefully, falling back to a rolling restart")
        .failure_types(&[FailureType::Application, FailureType::Performance])
        .severities(&[Severity::Medium, Severity::High, Severity::Critical])
        .components(&[ComponentType::WebServer, ComponentType::ApiGateway, ComponentType::Application])
        .environments(&["production", "staging", "development"])
        .success_rate(0.85)
        .estimated_duration(Duration::from_secs(180))
        .max_execution_time(Duration::from_secs(900))
        .node(
            DecisionNode::condition("check_error_rate", Condition::ErrorRateAbove { threshold: 0.5 })
                .on_success("rolling_restart")
                .on_failure("graceful_restart"),
        )
        .node(
            DecisionNode::action("graceful_restart", "restart_service")
                .with_param("mode", "graceful")
                .with_retries(1)
                .on_success("verify_service")
                .on_failure("rolling_restart"),
        )
        .node(
            DecisionNode::action("rolling_restart", "restart_service")
                .with_param("mode", "rolling")
                .on_success("verify_service")
                .on_failure("escalate_service"),
        )
        .node(
            DecisionNode::repeat("verify_service", &["health_probe"])
                .describe("Probe health repeatedly to confirm the restart held")
                .with_max_iterations(3)
                .on_failure("escalate_service"),
        )
        .node(DecisionNode::action("health_probe", "check_service_health"))
        .node(escalation("escalate_service", "oncall"))
        .build()?;

    let scaling = RecoveryStrategy::builder("resource_scaling", "Resource scaling")
        .description("Scale out and shed cache pressure in parallel, then verify capacity")
        .failure_types(&[FailureType::Resource, FailureType::Performance])
        .severities(&[Severity::Medium, Severity::High, Severity::Critical])
        .components(&[
            ComponentType::Application,
            ComponentType::WebServer,
            ComponentType::MessageQueue,
            ComponentType::Cache,
        ])
        .environments(&["production"])
        .success_rate(0.75)
        .estimated_duration(Duration::from_secs(420))
        .node(
            DecisionNode::parallel("relieve_pressure", &["scale_out", "flush_cache"])
                .on_success("verify_capacity")
                .on_failure("escalate_capacity"),
        )
        .node(
            DecisionNode::action("scale_out", "scale_resources")
                .with_param("direction", "out")
                .with_param("replicas", 2),
        )
        .node(DecisionNode::action("flush_cache", "clear_cache"))
        .node(DecisionNode::action("verify_capacity", "verify_resource_usage").on_failure("escalate_capacity"))
        .node(escalation("escalate_capacity", "platform"))
        .build()?;

    let network = RecoveryStrategy::builder("network_recovery", "Network recovery")
        .description("Reroute traffic away from the failing path, restart load balancers if needed")
        .failure_types(&[FailureType::Network, FailureType::Dependency])
        .severities(&[Severity::Medium, Severity::High, Severity::Critical])
        .components(&[ComponentType::Network, ComponentType::LoadBalancer, ComponentType::ApiGateway])
        .environments(&["production", "staging"])
        .success_rate(0.70)
        .estimated_duration(Duration::from_secs(300))
        .node(DecisionNode::route("route_traffic", &["reroute_traffic"]))
        .node(
            DecisionNode::action("reroute_traffic", "reroute_traffic")
                .on_success("verify_connectivity")
                .on_failure("restart_load_balancer"),
        )
        .node(
            DecisionNode::action("restart_load_balancer", "restart_load_balancer")
                .on_success("verify_connectivity")
                .on_failure("escalate_network"),
        )
        .node(DecisionNode::action("verify_connectivity", "verify_connectivity").on_failure("escalate_network"))
        .node(escalation("escalate_network", "network"))
        .build()?;

    let security = RecoveryStrategy::builder("security_containment", "Security containment")
        .description("Isolate the compromised component, rotate credentials, page security")
        .failure_types(&[FailureType::Security])
        .severities(&[Severity::High, Severity::Critical])
        .components(&[
            ComponentType::Authentication,
            ComponentType::ApiGateway,
            ComponentType::Database,
            ComponentType::Application,
        ])
        .environments(&["production", "staging"])
        .success_rate(0.60)
        .human_oversight(true)
        .data_safety(DataSafety::Cautious)
        .estimated_duration(Duration::from_secs(900))
        .node(
            DecisionNode::gate("isolate_component", "isolate_component")
                .on_success("rotate_credentials")
                .on_failure("escalate_security"),
        )
        .node(
            DecisionNode::action("rotate_credentials", "rotate_credentials")
                .on_success("page_security")
                .on_failure("escalate_security"),
        )
        .node(escalation("page_security", "security"))
        .node(escalation("escalate_security", "security"))
        .build()?;

    let restore = RecoveryStrategy::builder("data_restore", "Restore from backup")
        .description("Restore the affected store from the latest verified backup")
        .failure_types(&[FailureType::Data])
        .severities(&[Severity::Critical])
        .components(&[ComponentType::Database, ComponentType::Storage])
        .environments(&["production"])
        .success_rate(0.65)
        .human_oversight(true)
        .data_safety(DataSafety::Risky)
        .estimated_duration(Duration::from_secs(3600))
        .max_execution_time(Duration::from_secs(7200))
        .node(
            DecisionNode::gate("approve_restore", "restore_from_backup")
                .with_param("backup", "latest_verified")
                .on_success("verify_integrity")
                .on_failure("escalate_restore"),
        )
        .node(DecisionNode::action("verify_integrity", "verify_data_integrity").on_failure("escalate_restore"))
        .node(escalation("escalate_restore", "dba"))
        .build()?;

    Ok(vec![database, service, scaling, network, security, restore])
}

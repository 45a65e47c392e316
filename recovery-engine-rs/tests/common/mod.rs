//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recovery_engine::{
    ActionExecutor, ActionExecutorRegistry, ActionOutcome, CategorizedFailure, ComponentType, EngineConfig,
    FailureType, Params, Severity, StrategyCatalog,
};

/// Config with near-zero retry delays and short approval waits
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        approval_timeout_ms: 50,
        retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        ..Default::default()
    }
}

/// Registers a succeeding executor for every action the default catalog uses
pub fn succeeding_actions() -> ActionExecutorRegistry {
    let mut registry = ActionExecutorRegistry::new();
    let catalog = StrategyCatalog::with_defaults().expect("default catalog");
    for action in catalog.required_actions() {
        registry.register_fn(action, |_, _| Ok(ActionOutcome::success()));
    }
    registry
}

pub fn database_outage() -> CategorizedFailure {
    CategorizedFailure::new("inc-db-1", FailureType::Data, Severity::Critical)
        .with_component(ComponentType::Database)
        .with_environment("production")
}

pub fn cache_pressure() -> CategorizedFailure {
    CategorizedFailure::new("inc-cache-1", FailureType::Resource, Severity::High)
        .with_component(ComponentType::Cache)
        .with_environment("production")
}

pub fn api_errors() -> CategorizedFailure {
    CategorizedFailure::new("inc-api-1", FailureType::Application, Severity::High)
        .with_component(ComponentType::ApiGateway)
        .with_environment("staging")
        .with_error_rate(0.7)
}

/// Sleeps before succeeding
pub struct SlowExecutor(pub Duration);

#[async_trait]
impl ActionExecutor for SlowExecutor {
    async fn execute(&self, _params: &Params, _failure: &CategorizedFailure) -> anyhow::Result<ActionOutcome> {
        tokio::time::sleep(self.0).await;
        Ok(ActionOutcome::success())
    }
}

/// Counts calls and returns a fixed outcome
#[derive(Clone)]
pub struct CountingExecutor {
    pub calls: Arc<AtomicUsize>,
    pub outcome: ActionOutcome,
}

impl CountingExecutor {
    pub fn new(outcome: ActionOutcome) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            outcome,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for CountingExecutor {
    async fn execute(&self, _params: &Params, _failure: &CategorizedFailure) -> anyhow::Result<ActionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

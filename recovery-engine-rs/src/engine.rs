//! # Recovery Engine
//!
//! The one object callers hold. It owns the strategy catalog, the executor
//! and condition registries, the approval handler, the recorder and the
//! statistics, and is safe to share behind an `Arc` across tasks that
//! recover different incidents at once.

use std::sync::Arc;

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::actions::{ActionExecutor, ActionExecutorRegistry};
use crate::approval::{ApprovalHandler, NoApprover};
use crate::catalog::StrategyCatalog;
use crate::conditions::ConditionRegistry;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::export::{self, ExportFormat};
use crate::failure::CategorizedFailure;
use crate::interpreter::{InterpreterSettings, TreeInterpreter};
use crate::logging::log_path_summary;
use crate::path::{DecisionPath, DecisionResult};
use crate::recorder::{ActiveExecution, ExecutionRecorder, NdjsonArchive, PathArchive};
use crate::selector::{StrategyScore, StrategySelector};
use crate::statistics::{EngineStatistics, StatisticsAggregator};
use crate::strategy::RecoveryStrategy;

/// Wires the engine's collaborators together
pub struct RecoveryEngineBuilder {
    config: EngineConfig,
    catalog: Option<StrategyCatalog>,
    actions: ActionExecutorRegistry,
    conditions: ConditionRegistry,
    approvals: Option<Arc<dyn ApprovalHandler>>,
    archive: Option<Arc<dyn PathArchive>>,
}

impl Default for RecoveryEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            catalog: None,
            actions: ActionExecutorRegistry::new(),
            conditions: ConditionRegistry::new(),
            approvals: None,
            archive: None,
        }
    }
}

impl RecoveryEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the built-in catalog
    pub fn catalog(mut self, catalog: StrategyCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn actions(mut self, actions: ActionExecutorRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn action<S, E>(mut self, action: S, executor: E) -> Self
    where
        S: Into<String>,
        E: ActionExecutor + 'static,
    {
        self.actions.register(action, executor);
        self
    }

    pub fn conditions(mut self, conditions: ConditionRegistry) -> Self {
        self.conditions = conditions;
        self
    }

    /// Defaults to [`NoApprover`], which lets every gate time out
    pub fn approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approvals = Some(handler);
        self
    }

    /// Overrides the NDJSON archive derived from `archive_path`
    pub fn archive<A: PathArchive + 'static>(mut self, archive: A) -> Self {
        self.archive = Some(Arc::new(archive));
        self
    }

    pub fn build(self) -> Result<RecoveryEngine> {
        self.config.validate()?;

        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => StrategyCatalog::with_defaults()?,
        };

        let missing_actions = self.actions.missing_for(&catalog.required_actions());
        if !missing_actions.is_empty() {
            warn!(
                missing = ?missing_actions,
                "Catalog actions without a registered executor will fail at run time"
            );
        }
        let missing_conditions: Vec<String> = catalog
            .required_conditions()
            .into_iter()
            .filter(|name| !self.conditions.contains(name))
            .collect();
        if !missing_conditions.is_empty() {
            warn!(
                missing = ?missing_conditions,
                "Custom conditions without a registered evaluator will read as false"
            );
        }

        let archive = self.archive.or_else(|| {
            self.config
                .archive_path
                .as_ref()
                .map(|path| Arc::new(NdjsonArchive::new(path)) as Arc<dyn PathArchive>)
        });
        let mut recorder = ExecutionRecorder::new();
        if let Some(archive) = archive {
            recorder = recorder.with_shared_archive(archive);
        }

        let catalog = Arc::new(catalog);
        let selector = StrategySelector::new(catalog.clone()).with_max_data_safety(self.config.max_data_safety);
        let interpreter = TreeInterpreter::new(
            Arc::new(self.actions),
            Arc::new(self.conditions),
            self.approvals.unwrap_or_else(|| Arc::new(NoApprover)),
            InterpreterSettings::from(&self.config),
        );

        info!(
            strategies = catalog.len(),
            max_concurrent = self.config.max_concurrent_executions,
            archive = recorder.has_archive(),
            "Recovery engine initialized"
        );

        Ok(RecoveryEngine {
            permits: Semaphore::new(self.config.max_concurrent_executions),
            config: self.config,
            catalog,
            selector,
            interpreter,
            recorder,
            statistics: StatisticsAggregator::new(),
        })
    }
}

/// Selects and executes recovery strategies
pub struct RecoveryEngine {
    config: EngineConfig,
    catalog: Arc<StrategyCatalog>,
    selector: StrategySelector,
    interpreter: TreeInterpreter,
    recorder: ExecutionRecorder,
    statistics: StatisticsAggregator,
    permits: Semaphore,
}

impl RecoveryEngine {
    pub fn builder() -> RecoveryEngineBuilder {
        RecoveryEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<StrategyCatalog> {
        &self.catalog
    }

    /// Every eligible strategy for `failure`, best first
    pub fn rank(&self, failure: &CategorizedFailure) -> Vec<StrategyScore> {
        self.selector.rank(failure)
    }

    /// Recovers from `failure` and returns the finished decision path.
    ///
    /// With `strategy` unset the best catalog match is used. This never
    /// fails: every problem ends up in the returned path's result and
    /// error message.
    #[instrument(skip_all, fields(failure_id = %failure.failure_id, dry_run = dry_run))]
    pub async fn execute(
        &self,
        failure: &CategorizedFailure,
        strategy: Option<&RecoveryStrategy>,
        dry_run: bool,
    ) -> DecisionPath {
        // The semaphore is never closed, so acquiring only waits
        let _permit = self.permits.acquire().await.ok();
        counter!("recovery.executions.total", 1);

        let mut path = DecisionPath::new(&failure.failure_id, dry_run);
        path.reason(format!(
            "Failure {}: {} / {} affecting [{}] in {}",
            failure.failure_id,
            failure.failure_type,
            failure.severity,
            failure
                .affected_components
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            failure.environment()
        ));

        let selected: Arc<RecoveryStrategy>;
        let strategy = match strategy {
            Some(strategy) => {
                path.reason(format!("Using caller-supplied strategy '{}'", strategy.id));
                strategy
            }
            None => match self.selector.select(failure) {
                Some((strategy, score)) => {
                    path.reason(format!(
                        "Selected strategy '{}' with score {:.2} (match {:.2} + success rate {:.2})",
                        strategy.id,
                        score.total,
                        score.match_score,
                        strategy.success_rate
                    ));
                    selected = strategy;
                    &*selected
                }
                None => return self.no_match(path).await,
            },
        };

        path.strategy_id = Some(strategy.id.clone());
        info!(
            path_id = %path.path_id,
            strategy = %strategy.id,
            "Starting recovery"
        );

        let (registration, cancel) = self.recorder.begin(&path);
        self.interpreter.run(strategy, failure, &mut path, Some(cancel)).await;
        let path = self.finalize(path).await;
        drop(registration);
        path
    }

    async fn no_match(&self, mut path: DecisionPath) -> DecisionPath {
        let message = format!("No matching recovery strategy found for failure {}", path.failure_id);
        warn!(failure_id = %path.failure_id, "No matching recovery strategy");
        path.reason(message.clone());
        path.finish(DecisionResult::Failure, Some(message));
        self.finalize(path).await
    }

    async fn finalize(&self, path: DecisionPath) -> DecisionPath {
        self.statistics.record(&path);

        if path.success {
            counter!("recovery.executions.success", 1);
        }
        histogram!("recovery.execution.duration_ms", path.total_execution_time_ms);
        log_path_summary(&path);

        self.recorder.complete(path.clone()).await;
        path
    }

    pub fn statistics(&self) -> EngineStatistics {
        self.statistics.snapshot()
    }

    /// Exports a finished path from history
    pub fn export(&self, path_id: Uuid, format: ExportFormat) -> Result<String> {
        let path = self.recorder.find(path_id).ok_or(Error::PathNotFound(path_id))?;
        export::export(&path, format)
    }

    pub fn active_executions(&self) -> Vec<ActiveExecution> {
        self.recorder.active()
    }

    pub fn history(&self) -> Vec<DecisionPath> {
        self.recorder.history()
    }

    pub fn find_path(&self, path_id: Uuid) -> Option<DecisionPath> {
        self.recorder.find(path_id)
    }

    pub fn paths_for_failure(&self, failure_id: &str) -> Vec<DecisionPath> {
        self.recorder.for_failure(failure_id)
    }

    /// Asks a running recovery to stop before its next node
    pub fn cancel(&self, path_id: Uuid) -> bool {
        let cancelled = self.recorder.cancel(path_id);
        if cancelled {
            info!(path_id = %path_id, "Cancellation requested");
        }
        cancelled
    }
}

impl std::fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("strategies", &self.catalog.len())
            .field("interpreter", &self.interpreter)
            .field("recorder", &self.recorder)
            .finish()
    }
}

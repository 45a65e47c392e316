//! # Recovery Engine
//!
//! Decision-tree recovery orchestration for the Phoenix ORCH AGI system.
//! Given a categorized operational failure, the engine picks the
//! best-matching remediation strategy from its catalog and walks that
//! strategy's decision tree, producing a complete audit trace of every
//! branch, action and approval along the way.
//!
//! ## Features
//!
//! - Weighted strategy selection over failure type, severity, components and environment
//! - CONDITION, ACTION, GATE, ROUTE, PARALLEL and LOOP decision nodes
//! - Human approval gates with bounded waits and suspension
//! - Executor deadlines, retries with exponential backoff, panic containment
//! - Dry runs that simulate every action without side effects
//! - Execution history, NDJSON archiving, statistics and JSON/text export
//!
//! ```no_run
//! use recovery_engine::{CategorizedFailure, FailureType, RecoveryEngine, Severity};
//!
//! # async fn demo() -> recovery_engine::Result<()> {
//! let engine = RecoveryEngine::builder().build()?;
//! let failure = CategorizedFailure::new("inc-17", FailureType::Resource, Severity::High);
//! let path = engine.execute(&failure, None, true).await;
//! println!("{:?}", path.final_result);
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod approval;
pub mod catalog;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod failure;
pub mod interpreter;
pub mod logging;
pub mod node;
pub mod path;
pub mod recorder;
pub mod retry;
pub mod selector;
pub mod statistics;
pub mod strategy;

// Re-export commonly used types
pub use actions::{ActionExecutor, ActionExecutorRegistry, ActionOutcome};
pub use approval::{ApprovalDecision, ApprovalHandler, ApprovalRequest, AutoApprove, ChannelApprovalHandler, NoApprover};
pub use catalog::StrategyCatalog;
pub use conditions::{Condition, ConditionEvaluator, ConditionRegistry, Params};
pub use crate::config::EngineConfig;
pub use engine::{RecoveryEngine, RecoveryEngineBuilder};
pub use error::{Error, Result};
pub use export::{export, ExportFormat};
pub use failure::{CategorizedFailure, ComponentType, FailureContext, FailureType, RecoveryComplexity, Severity};
pub use logging::{init_logging, LoggingConfig};
pub use node::{DecisionNode, NodeType};
pub use path::{ActionRecord, ApprovalRecord, ApprovalStatus, DecisionPath, DecisionResult};
pub use recorder::{ActiveExecution, NdjsonArchive, PathArchive};
pub use retry::RetryPolicy;
pub use selector::{StrategyScore, StrategySelector};
pub use statistics::{EngineStatistics, StrategyStats};
pub use strategy::{DataSafety, RecoveryStrategy, StrategyBuilder};

/// Initializes logging from an engine configuration
pub fn init(config: &EngineConfig) -> Result<()> {
    init_logging(Some(&config.logging))
}

/// Loads configuration from `path` (and the environment), initializes
/// logging and builds an engine with the default catalog and no executors
pub fn init_with_config(path: Option<&std::path::Path>) -> Result<RecoveryEngine> {
    let config = EngineConfig::load(path);
    init(&config)?;
    RecoveryEngine::builder().config(config).build()
}

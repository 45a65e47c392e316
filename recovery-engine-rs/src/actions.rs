//! # Action Executors
//!
//! The invocation contract for remediation actions. Concrete actions
//! (restarting services, scaling, failing over) live outside this crate and
//! are registered per action identifier at startup.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conditions::Params;
use crate::failure::CategorizedFailure;
use crate::path::DecisionResult;

/// Typed result returned by every executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub result: DecisionResult,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Params,
}

impl ActionOutcome {
    fn with_result(result: DecisionResult, message: Option<String>) -> Self {
        Self {
            result,
            message,
            data: Params::new(),
        }
    }

    pub fn success() -> Self {
        Self::with_result(DecisionResult::Success, None)
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self::with_result(DecisionResult::Failure, Some(message.into()))
    }

    pub fn partial<S: Into<String>>(message: S) -> Self {
        Self::with_result(DecisionResult::PartialSuccess, Some(message.into()))
    }

    /// The action could not resolve the incident and a human must take over
    pub fn escalate<S: Into<String>>(message: S) -> Self {
        Self::with_result(DecisionResult::EscalationNeeded, Some(message.into()))
    }

    pub fn manual<S: Into<String>>(message: S) -> Self {
        Self::with_result(DecisionResult::ManualIntervention, Some(message.into()))
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data<K: Into<String>, V: Into<serde_json::Value>>(mut self, key: K, value: V) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Boolean-style executors map `true` to SUCCESS and `false` to FAILURE
impl From<bool> for ActionOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            Self::success()
        } else {
            Self::with_result(DecisionResult::Failure, None)
        }
    }
}

/// A remediation action bound to one action identifier
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Runs the action; an `Err` is recorded and treated as FAILURE
    async fn execute(&self, params: &Params, failure: &CategorizedFailure) -> anyhow::Result<ActionOutcome>;
}

/// Adapter for synchronous closures
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F> ActionExecutor for FnExecutor<F>
where
    F: Fn(&Params, &CategorizedFailure) -> anyhow::Result<ActionOutcome> + Send + Sync,
{
    async fn execute(&self, params: &Params, failure: &CategorizedFailure) -> anyhow::Result<ActionOutcome> {
        (self.0)(params, failure)
    }
}

/// Maps action identifiers to executors
#[derive(Default, Clone)]
pub struct ActionExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an executor to an action id, replacing any previous binding
    pub fn register<S, E>(&mut self, action: S, executor: E) -> &mut Self
    where
        S: Into<String>,
        E: ActionExecutor + 'static,
    {
        self.executors.insert(action.into(), Arc::new(executor));
        self
    }

    /// Binds an already shared executor
    pub fn register_shared<S: Into<String>>(&mut self, action: S, executor: Arc<dyn ActionExecutor>) -> &mut Self {
        self.executors.insert(action.into(), executor);
        self
    }

    /// Binds a synchronous closure
    pub fn register_fn<S, F>(&mut self, action: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&Params, &CategorizedFailure) -> anyhow::Result<ActionOutcome> + Send + Sync + 'static,
    {
        self.register(action, FnExecutor(f))
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.executors.contains_key(action)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Required actions that have no executor bound
    pub fn missing_for<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        required
            .into_iter()
            .filter(|action| !self.contains(action))
            .cloned()
            .collect()
    }

    pub fn actions(&self) -> BTreeSet<&str> {
        self.executors.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ActionExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutorRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

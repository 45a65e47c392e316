//! # Condition Evaluators
//!
//! Predicates used by CONDITION nodes and as LOOP exit conditions.
//!
//! Built-in predicates are typed variants of [`Condition`]; anything more
//! specialised is a named [`ConditionEvaluator`] registered at startup and
//! referenced through [`Condition::Custom`]. All evaluation is read-only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::failure::{CategorizedFailure, ComponentType, FailureType, RecoveryComplexity, Severity};

/// Parameter bag handed to custom evaluators
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A named predicate supplied by the embedding application
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluates the predicate; errors are downgraded to a false branch by
    /// the interpreter
    fn evaluate(&self, failure: &CategorizedFailure, params: &Params) -> anyhow::Result<bool>;
}

/// Adapter that turns a closure into a [`ConditionEvaluator`]
pub struct FnCondition<F>(pub F);

impl<F> ConditionEvaluator for FnCondition<F>
where
    F: Fn(&CategorizedFailure, &Params) -> anyhow::Result<bool> + Send + Sync,
{
    fn evaluate(&self, failure: &CategorizedFailure, params: &Params) -> anyhow::Result<bool> {
        (self.0)(failure, params)
    }
}

/// Predicate descriptor carried by a decision node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Constant predicate
    Always { value: bool },
    SeverityAtLeast { severity: Severity },
    FailureTypeIn { types: Vec<FailureType> },
    ComponentAffected { component: ComponentType },
    EnvironmentIs { environment: String },
    ErrorRateAbove { threshold: f64 },
    AffectedUsersAbove { count: u64 },
    ComplexityAtMost { complexity: RecoveryComplexity },
    MetadataEquals { key: String, value: String },
    /// Delegates to an evaluator registered under `name`
    Custom {
        name: String,
        #[serde(default)]
        params: Params,
    },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn custom<S: Into<String>>(name: S) -> Self {
        Condition::Custom {
            name: name.into(),
            params: Params::new(),
        }
    }

    /// Evaluates the predicate against a failure
    pub fn evaluate(
        &self,
        failure: &CategorizedFailure,
        registry: &ConditionRegistry,
    ) -> anyhow::Result<bool> {
        let ctx = &failure.context;
        let value = match self {
            Condition::Always { value } => *value,
            Condition::SeverityAtLeast { severity } => failure.severity >= *severity,
            Condition::FailureTypeIn { types } => types.contains(&failure.failure_type),
            Condition::ComponentAffected { component } => {
                failure.affected_components.contains(component)
            }
            Condition::EnvironmentIs { environment } => ctx.environment == *environment,
            Condition::ErrorRateAbove { threshold } => ctx.error_rate > *threshold,
            Condition::AffectedUsersAbove { count } => ctx.affected_users > *count,
            Condition::ComplexityAtMost { complexity } => failure.recovery_complexity <= *complexity,
            Condition::MetadataEquals { key, value } => {
                ctx.metadata.get(key).map_or(false, |v| v == value)
            }
            Condition::Custom { name, params } => {
                let evaluator = registry
                    .get(name)
                    .ok_or_else(|| Error::UnknownCondition(name.clone()))?;
                evaluator.evaluate(failure, params)?
            }
            Condition::All { conditions } => {
                for condition in conditions {
                    if !condition.evaluate(failure, registry)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Any { conditions } => {
                for condition in conditions {
                    if condition.evaluate(failure, registry)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not { condition } => !condition.evaluate(failure, registry)?,
        };
        Ok(value)
    }

    /// Short human-readable rendering used in decision reasoning
    pub fn describe(&self) -> String {
        match self {
            Condition::Always { value } => format!("always {}", value),
            Condition::SeverityAtLeast { severity } => format!("severity >= {}", severity),
            Condition::FailureTypeIn { types } => {
                let names: Vec<String> = types.iter().map(|t| t.to_string()).collect();
                format!("failure type in [{}]", names.join(", "))
            }
            Condition::ComponentAffected { component } => format!("{} affected", component),
            Condition::EnvironmentIs { environment } => format!("environment == {}", environment),
            Condition::ErrorRateAbove { threshold } => format!("error rate > {}", threshold),
            Condition::AffectedUsersAbove { count } => format!("affected users > {}", count),
            Condition::ComplexityAtMost { complexity } => {
                format!("complexity <= {:?}", complexity)
            }
            Condition::MetadataEquals { key, value } => format!("metadata[{}] == {}", key, value),
            Condition::Custom { name, .. } => format!("custom:{}", name),
            Condition::All { conditions } => format!("all of {} conditions", conditions.len()),
            Condition::Any { conditions } => format!("any of {} conditions", conditions.len()),
            Condition::Not { condition } => format!("not ({})", condition.describe()),
        }
    }

    /// Names of custom evaluators this predicate depends on
    pub fn custom_names(&self) -> Vec<&str> {
        match self {
            Condition::Custom { name, .. } => vec![name.as_str()],
            Condition::All { conditions } | Condition::Any { conditions } => {
                conditions.iter().flat_map(|c| c.custom_names()).collect()
            }
            Condition::Not { condition } => condition.custom_names(),
            _ => Vec::new(),
        }
    }
}

/// Lookup table of named custom evaluators, populated once at startup
#[derive(Default, Clone)]
pub struct ConditionRegistry {
    evaluators: HashMap<String, Arc<dyn ConditionEvaluator>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an evaluator, replacing any previous one under that name
    pub fn register<S, E>(&mut self, name: S, evaluator: E) -> &mut Self
    where
        S: Into<String>,
        E: ConditionEvaluator + 'static,
    {
        self.evaluators.insert(name.into(), Arc::new(evaluator));
        self
    }

    /// Registers a closure as an evaluator
    pub fn register_fn<S, F>(&mut self, name: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&CategorizedFailure, &Params) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.register(name, FnCondition(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConditionEvaluator>> {
        self.evaluators.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.evaluators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

impl std::fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.evaluators.keys().collect();
        names.sort();
        f.debug_struct("ConditionRegistry").field("evaluators", &names).finish()
    }
}

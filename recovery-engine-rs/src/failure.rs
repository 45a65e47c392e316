//! # Categorized Failures
//!
//! The input handed to the engine by the upstream failure classifier.
//! The engine only ever reads these values.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad category of an operational failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    /// Data corruption, replication lag, integrity violations
    Data,
    /// Exhausted CPU, memory, disk or connection pools
    Resource,
    /// Connectivity, DNS, packet loss
    Network,
    /// Bad deploys, drifted or invalid configuration
    Configuration,
    /// Intrusions, credential leaks, policy violations
    Security,
    /// An upstream or third-party dependency is failing
    Dependency,
    /// Latency or throughput regressions
    Performance,
    /// Crashes and errors inside application code
    Application,
    /// Host, cluster or platform level failures
    Infrastructure,
    /// The classifier could not decide
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Data => write!(f, "DATA"),
            FailureType::Resource => write!(f, "RESOURCE"),
            FailureType::Network => write!(f, "NETWORK"),
            FailureType::Configuration => write!(f, "CONFIGURATION"),
            FailureType::Security => write!(f, "SECURITY"),
            FailureType::Dependency => write!(f, "DEPENDENCY"),
            FailureType::Performance => write!(f, "PERFORMANCE"),
            FailureType::Application => write!(f, "APPLICATION"),
            FailureType::Infrastructure => write!(f, "INFRASTRUCTURE"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Severity of a failure, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Kind of system component affected by a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentType {
    Database,
    WebServer,
    ApiGateway,
    Cache,
    MessageQueue,
    LoadBalancer,
    Storage,
    Network,
    Authentication,
    Monitoring,
    Application,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentType::Database => "DATABASE",
            ComponentType::WebServer => "WEB_SERVER",
            ComponentType::ApiGateway => "API_GATEWAY",
            ComponentType::Cache => "CACHE",
            ComponentType::MessageQueue => "MESSAGE_QUEUE",
            ComponentType::LoadBalancer => "LOAD_BALANCER",
            ComponentType::Storage => "STORAGE",
            ComponentType::Network => "NETWORK",
            ComponentType::Authentication => "AUTHENTICATION",
            ComponentType::Monitoring => "MONITORING",
            ComponentType::Application => "APPLICATION",
        };
        f.write_str(name)
    }
}

/// Classifier hint about how hard the failure will be to remediate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryComplexity {
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl Default for RecoveryComplexity {
    fn default() -> Self {
        RecoveryComplexity::Moderate
    }
}

/// Runtime context observed when the failure was classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Deployment environment, e.g. "production" or "staging"
    pub environment: String,
    /// When the failure was detected
    pub timestamp: DateTime<Utc>,
    /// Number of users currently affected
    pub affected_users: u64,
    /// Observed error rate in the range 0.0 - 1.0
    pub error_rate: f64,
    /// Free-form classifier metadata (service names, regions, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Default for FailureContext {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            timestamp: Utc::now(),
            affected_users: 0,
            error_rate: 0.0,
            metadata: HashMap::new(),
        }
    }
}

/// A failure that has already been classified upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedFailure {
    pub failure_id: String,
    pub failure_type: FailureType,
    pub severity: Severity,
    pub affected_components: BTreeSet<ComponentType>,
    pub recovery_complexity: RecoveryComplexity,
    #[serde(default)]
    pub description: String,
    pub context: FailureContext,
}

impl CategorizedFailure {
    /// Starts a new failure description with an empty component set and
    /// default context
    pub fn new<S: Into<String>>(failure_id: S, failure_type: FailureType, severity: Severity) -> Self {
        Self {
            failure_id: failure_id.into(),
            failure_type,
            severity,
            affected_components: BTreeSet::new(),
            recovery_complexity: RecoveryComplexity::default(),
            description: String::new(),
            context: FailureContext::default(),
        }
    }

    pub fn with_component(mut self, component: ComponentType) -> Self {
        self.affected_components.insert(component);
        self
    }

    pub fn with_environment<S: Into<String>>(mut self, environment: S) -> Self {
        self.context.environment = environment.into();
        self
    }

    pub fn with_complexity(mut self, complexity: RecoveryComplexity) -> Self {
        self.recovery_complexity = complexity;
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_affected_users(mut self, users: u64) -> Self {
        self.context.affected_users = users;
        self
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.context.error_rate = error_rate;
        self
    }

    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.context.metadata.insert(key.into(), value.into());
        self
    }

    /// Deployment environment the failure was observed in
    pub fn environment(&self) -> &str {
        &self.context.environment
    }
}

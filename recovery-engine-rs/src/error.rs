//! # Engine Error Types
//!
//! Call-level errors raised while building catalogs, walking strategy
//! graphs, loading configuration or exporting decision paths.
//!
//! Node-level problems (a failing predicate, a crashing executor) never
//! surface as an [`Error`]; the interpreter downgrades them to a FAILURE
//! branch. The variants here are the ones that abort a whole walk and end
//! up in `DecisionPath::error_message`.

use uuid::Uuid;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the recovery engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A node id referenced during the walk is not part of the strategy
    #[error("node '{node_id}' not found in strategy '{strategy_id}'")]
    NodeNotFound {
        strategy_id: String,
        node_id: String,
    },

    /// The walk exceeded the configured depth ceiling
    #[error("maximum decision depth {limit} exceeded at node '{node_id}' (possible cycle)")]
    DepthExceeded { node_id: String, limit: usize },

    /// A ROUTE node has nowhere to forward to
    #[error("route node '{0}' declares no children")]
    EmptyRoute(String),

    /// A strategy failed structural validation
    #[error("invalid strategy '{strategy_id}': {reason}")]
    InvalidStrategy { strategy_id: String, reason: String },

    /// Two strategies were registered under the same id
    #[error("duplicate strategy id '{0}'")]
    DuplicateStrategy(String),

    /// A custom condition evaluator was referenced but never registered
    #[error("no condition evaluator registered under '{0}'")]
    UnknownCondition(String),

    /// Export was requested in a format the engine does not produce
    #[error("unsupported export format '{0}'")]
    UnsupportedFormat(String),

    /// No archived decision path carries the requested id
    #[error("decision path {0} not found")]
    PathNotFound(Uuid),

    /// Configuration values are out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Logging or another process-wide facility could not be installed
    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for errors that indicate a malformed strategy graph
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Error::NodeNotFound { .. } | Error::DepthExceeded { .. } | Error::EmptyRoute(_)
        )
    }
}

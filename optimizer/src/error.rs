//! Caller-visible error type for the optimizer pipeline.
//!
//! Only two classes of failure ever reach a caller: structural task-graph
//! faults and invalid configuration. Cache faults, probe faults, malformed
//! expression nodes and "no accessible model" all degrade to a logged
//! warning plus a safe default inside the component that hit them.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dag::GraphError;

/// Result type alias for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Errors surfaced by [`crate::pipeline::QueryOptimizer`].
#[derive(Error, Debug)]
pub enum OptimizerError {
    /// The declared task graph is structurally invalid. Not retryable:
    /// the caller must fix the graph.
    #[error("Invalid task graph: {0}")]
    Graph(#[from] GraphError),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OptimizerError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Machine-readable code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Graph(GraphError::Cycle { .. }) => "GRAPH_CYCLE",
            Self::Graph(GraphError::DuplicateNode { .. }) => "GRAPH_DUPLICATE_NODE",
            Self::Graph(GraphError::UnknownDependency { .. }) => "GRAPH_UNKNOWN_DEPENDENCY",
            Self::Config(_) => "INVALID_CONFIG",
        }
    }
}

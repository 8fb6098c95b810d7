//! Dependency Graph Builder and Parallel Execution Planner.
//!
//! # Modules
//!
//! - [`graph`] - `TaskSpec` input, `GraphBuilder`, and the leveled
//!   `DependencyGraph` (petgraph storage, iterative three-colour DFS)
//! - [`planner`] - `ParallelPlanner` producing an `ExecutionPlan`: parallel
//!   groups, critical path, speedup, Amdahl opportunity and validation
//!
//! Everything here is pure in-memory computation and never suspends.

pub mod graph;
pub mod planner;

use thiserror::Error;

pub use graph::{DependencyGraph, DependencyNode, GraphBuilder, TaskSpec};
pub use planner::{
    CriticalPath, ExecutionPlan, ParallelGroup, ParallelOpportunity, ParallelPlanner,
    ScheduledLevel, ValidationReport, ValidationWarning, AMDAHL_PARALLELISM_CAP,
    CRITICAL_PATH_WARN_LEN,
};

/// Structural task-graph faults. Never retryable: the caller must fix the
/// graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// `from` depends on `to`, which (transitively) depends on `from`.
    #[error("Dependency cycle detected at edge {from} -> {to}")]
    Cycle { from: String, to: String },

    #[error("Duplicate task id {id}")]
    DuplicateNode { id: String },

    #[error("Task {node} depends on unknown task {dependency}")]
    UnknownDependency { node: String, dependency: String },
}

impl GraphError {
    pub fn cycle(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Cycle {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::DuplicateNode { id: id.into() }
    }

    pub fn unknown_dependency(node: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            node: node.into(),
            dependency: dependency.into(),
        }
    }

    /// The offending edge, when there is one.
    pub fn edge(&self) -> Option<(&str, &str)> {
        match self {
            Self::Cycle { from, to } => Some((from.as_str(), to.as_str())),
            Self::UnknownDependency { node, dependency } => {
                Some((node.as_str(), dependency.as_str()))
            }
            Self::DuplicateNode { .. } => None,
        }
    }
}

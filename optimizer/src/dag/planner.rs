//! Parallel execution planning over a leveled dependency graph.
//!
//! ```text
//! level 0: [A]        ─┐ group latency = max node latency
//! level 1: [B, C, D]   ├ parallel latency = Σ group latencies
//! level 2: [E]        ─┘ speedup = sequential / parallel
//! ```
//!
//! Levels run back to back in the generated schedule. Nodes within a level
//! run concurrently, but a level never starts before the previous one ends.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::graph::{DependencyGraph, GraphBuilder, TaskSpec};
use super::GraphError;
use crate::config::PlannerConfig;

/// Critical paths longer than this many nodes trigger a decomposition warning.
pub const CRITICAL_PATH_WARN_LEN: usize = 10;

/// Upper bound on the parallelism recommended by the Amdahl estimate.
pub const AMDAHL_PARALLELISM_CAP: usize = 8;

/// Nodes sharing a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub group_id: String,
    pub level: usize,
    pub nodes: Vec<String>,
    /// Slowest node in the group
    pub estimated_latency_ms: u64,
    pub estimated_cost: f64,
    /// min(group size, global cap)
    pub max_parallelism: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPath {
    pub nodes: Vec<String>,
    pub latency_ms: u64,
}

/// Amdahl's-law estimate of achievable speedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelOpportunity {
    /// Share of nodes sitting in levels wider than one
    pub parallel_fraction: f64,
    pub recommended_parallelism: usize,
    pub estimated_speedup: f64,
}

/// Non-fatal modeling concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    OrphanNode { id: String },
    LongCriticalPath { length: usize, limit: usize },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrphanNode { id } => write!(
                f,
                "task {} has no dependencies and no dependents; check the graph",
                id
            ),
            Self::LongCriticalPath { length, limit } => write!(
                f,
                "critical path spans {} tasks (limit {}); consider decomposing",
                length, limit
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A level placed on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledLevel {
    pub group_id: String,
    pub level: usize,
    pub nodes: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Everything the execution layer needs to run a task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<ParallelGroup>,
    pub critical_path: CriticalPath,
    pub sequential_latency_ms: u64,
    pub parallel_latency_ms: u64,
    pub speedup: f64,
    /// Σ group parallelism / (levels × global cap)
    pub resource_utilization: f64,
    pub total_cost: f64,
    pub max_parallelism: usize,
    pub opportunity: ParallelOpportunity,
    pub validation: ValidationReport,
}

impl ExecutionPlan {
    pub fn node_count(&self) -> usize {
        self.groups.iter().map(|g| g.nodes.len()).sum()
    }

    /// Assign each level a start/end by cumulative group latency. Times that
    /// would overflow the calendar are pinned to the latest representable
    /// instant.
    pub fn schedule(&self, start: DateTime<Utc>) -> Vec<ScheduledLevel> {
        let mut cursor = start;
        self.groups
            .iter()
            .map(|group| {
                let millis = i64::try_from(group.estimated_latency_ms).unwrap_or(i64::MAX);
                let end = cursor
                    .checked_add_signed(ChronoDuration::milliseconds(millis))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let scheduled = ScheduledLevel {
                    group_id: group.group_id.clone(),
                    level: group.level,
                    nodes: group.nodes.clone(),
                    start: cursor,
                    end,
                };
                cursor = end;
                scheduled
            })
            .collect()
    }
}

/// Computes parallel groupings and speedup for a dependency graph.
#[derive(Debug, Clone)]
pub struct ParallelPlanner {
    max_parallelism: usize,
    builder: GraphBuilder,
}

impl Default for ParallelPlanner {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::default())
    }
}

impl ParallelPlanner {
    /// Planner with a global cap (at least 1) and default estimates.
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
            builder: GraphBuilder::default(),
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            max_parallelism: config.max_parallelism.max(1),
            builder: GraphBuilder::from_config(config),
        }
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    /// Build the graph for `tasks` and plan it.
    pub fn plan_tasks(&self, tasks: &[TaskSpec]) -> Result<ExecutionPlan, GraphError> {
        let graph = self.builder.build(tasks)?;
        Ok(self.plan(&graph))
    }

    pub fn plan(&self, graph: &DependencyGraph) -> ExecutionPlan {
        let cap = self.max_parallelism;

        let groups: Vec<ParallelGroup> = graph
            .levels()
            .into_iter()
            .enumerate()
            .map(|(level, nodes)| ParallelGroup {
                group_id: format!("group-{}", level),
                level,
                estimated_latency_ms: nodes
                    .iter()
                    .map(|n| n.estimated_latency_ms)
                    .max()
                    .unwrap_or(0),
                estimated_cost: nodes.iter().map(|n| n.estimated_cost).sum(),
                max_parallelism: nodes.len().min(cap),
                nodes: nodes.iter().map(|n| n.id.clone()).collect(),
            })
            .collect();

        let sequential_latency_ms = graph.sequential_latency_ms();
        let parallel_latency_ms = groups
            .iter()
            .map(|g| g.estimated_latency_ms)
            .fold(0, u64::saturating_add);
        let speedup = if parallel_latency_ms == 0 {
            1.0
        } else {
            sequential_latency_ms as f64 / parallel_latency_ms as f64
        };
        let resource_utilization = if groups.is_empty() {
            0.0
        } else {
            groups.iter().map(|g| g.max_parallelism).sum::<usize>() as f64
                / (groups.len() * cap) as f64
        };

        let (path, path_latency) = graph.critical_path();
        let critical_path = CriticalPath {
            nodes: path,
            latency_ms: path_latency,
        };

        let opportunity = opportunity(&groups, graph.len());
        let validation = validate(graph, &critical_path);
        for warning in &validation.warnings {
            tracing::warn!("Task graph: {}", warning);
        }

        tracing::debug!(
            "Planned {} tasks in {} levels: sequential {}ms, parallel {}ms, speedup {:.2}",
            graph.len(),
            groups.len(),
            sequential_latency_ms,
            parallel_latency_ms,
            speedup
        );

        ExecutionPlan {
            groups,
            critical_path,
            sequential_latency_ms,
            parallel_latency_ms,
            speedup,
            resource_utilization,
            total_cost: graph.total_cost(),
            max_parallelism: cap,
            opportunity,
            validation,
        }
    }
}

fn opportunity(groups: &[ParallelGroup], total_nodes: usize) -> ParallelOpportunity {
    if total_nodes == 0 {
        return ParallelOpportunity {
            parallel_fraction: 0.0,
            recommended_parallelism: 1,
            estimated_speedup: 1.0,
        };
    }
    let parallel_nodes: usize = groups
        .iter()
        .filter(|g| g.nodes.len() > 1)
        .map(|g| g.nodes.len())
        .sum();
    let p = parallel_nodes as f64 / total_nodes as f64;
    let widest = groups.iter().map(|g| g.nodes.len()).max().unwrap_or(1);
    let parallelism = widest.clamp(1, AMDAHL_PARALLELISM_CAP);
    ParallelOpportunity {
        parallel_fraction: p,
        recommended_parallelism: parallelism,
        estimated_speedup: 1.0 / ((1.0 - p) + p / parallelism as f64),
    }
}

fn validate(graph: &DependencyGraph, critical_path: &CriticalPath) -> ValidationReport {
    let mut warnings = Vec::new();
    if graph.len() > 1 {
        warnings.extend(
            graph
                .orphans()
                .into_iter()
                .map(|n| ValidationWarning::OrphanNode { id: n.id.clone() }),
        );
    }
    if critical_path.nodes.len() > CRITICAL_PATH_WARN_LEN {
        warnings.push(ValidationWarning::LongCriticalPath {
            length: critical_path.nodes.len(),
            limit: CRITICAL_PATH_WARN_LEN,
        });
    }
    ValidationReport { warnings }
}

//! Task graph construction and leveling.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::GraphError;
use crate::config::PlannerConfig;

/// One task as declared by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    #[serde(default)]
    pub task_type: String,
    /// Ids of tasks that must finish first
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub estimated_latency_ms: Option<u64>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: String::new(),
            dependencies: Vec::new(),
            estimated_tokens: None,
            estimated_cost: None,
            estimated_latency_ms: None,
        }
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.estimated_latency_ms = Some(latency_ms);
        self
    }
}

/// A leveled node of a built graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: String,
    pub task_type: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    /// 0 with no dependencies, else 1 + the deepest dependency's level
    pub level: usize,
    pub estimated_cost: f64,
    pub estimated_latency_ms: u64,
}

/// Turns task specs into a validated, leveled graph.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    default_latency_ms: u64,
    latency_per_token_ms: f64,
    cost_per_token: f64,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::default())
    }
}

impl GraphBuilder {
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            default_latency_ms: config.default_latency_ms,
            latency_per_token_ms: config.latency_per_token_ms,
            cost_per_token: config.cost_per_token,
        }
    }

    /// Explicit latency, else a token-based estimate, else the default.
    pub fn estimate_latency_ms(&self, task: &TaskSpec) -> u64 {
        match (task.estimated_latency_ms, task.estimated_tokens) {
            (Some(latency), _) => latency,
            (None, Some(tokens)) => (tokens as f64 * self.latency_per_token_ms).ceil() as u64,
            (None, None) => self.default_latency_ms,
        }
    }

    /// Explicit cost, else a token-based estimate, else zero.
    pub fn estimate_cost(&self, task: &TaskSpec) -> f64 {
        match (task.estimated_cost, task.estimated_tokens) {
            (Some(cost), _) => cost,
            (None, Some(tokens)) => tokens as f64 * self.cost_per_token,
            (None, None) => 0.0,
        }
    }

    /// Build and level the graph. Cycles, duplicate ids and dangling
    /// dependencies abort the whole build.
    pub fn build(&self, tasks: &[TaskSpec]) -> Result<DependencyGraph, GraphError> {
        let mut graph: DiGraph<DependencyNode, ()> = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut index: HashMap<String, NodeIndex> = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if index.contains_key(&task.id) {
                return Err(GraphError::duplicate(&task.id));
            }
            let mut dependencies: Vec<String> = Vec::with_capacity(task.dependencies.len());
            for dep in &task.dependencies {
                if !dependencies.contains(dep) {
                    dependencies.push(dep.clone());
                }
            }
            let idx = graph.add_node(DependencyNode {
                id: task.id.clone(),
                task_type: task.task_type.clone(),
                dependencies,
                dependents: Vec::new(),
                level: 0,
                estimated_cost: self.estimate_cost(task),
                estimated_latency_ms: self.estimate_latency_ms(task),
            });
            index.insert(task.id.clone(), idx);
        }

        // deps[i] lists node i's dependencies in declaration order.
        let mut deps: Vec<Vec<NodeIndex>> = Vec::with_capacity(graph.node_count());
        for idx in graph.node_indices() {
            let mut resolved = Vec::with_capacity(graph[idx].dependencies.len());
            for dep in &graph[idx].dependencies {
                let dep_idx = index
                    .get(dep)
                    .copied()
                    .ok_or_else(|| GraphError::unknown_dependency(&graph[idx].id, dep))?;
                resolved.push(dep_idx);
            }
            deps.push(resolved);
        }
        for idx in graph.node_indices().collect::<Vec<_>>() {
            for &dep_idx in &deps[idx.index()] {
                graph.add_edge(dep_idx, idx, ());
                let dependent = graph[idx].id.clone();
                graph[dep_idx].dependents.push(dependent);
            }
        }

        let (topo_order, levels) = level_nodes(&graph, &deps)?;
        for (i, level) in levels.into_iter().enumerate() {
            graph[NodeIndex::new(i)].level = level;
        }

        Ok(DependencyGraph {
            graph,
            index,
            topo_order,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Iterative three-colour DFS along dependency edges. Returns nodes in
/// topological order (dependencies first) and each node's level.
fn level_nodes(
    graph: &DiGraph<DependencyNode, ()>,
    deps: &[Vec<NodeIndex>],
) -> Result<(Vec<NodeIndex>, Vec<usize>), GraphError> {
    let n = graph.node_count();
    let mut color = vec![Color::White; n];
    let mut level = vec![0usize; n];
    let mut order = Vec::with_capacity(n);

    for start in graph.node_indices() {
        if color[start.index()] != Color::White {
            continue;
        }
        color[start.index()] = Color::Gray;
        let mut stack: Vec<(NodeIndex, usize)> = vec![(start, 0)];

        while let Some(&(node, next)) = stack.last() {
            let node_deps = &deps[node.index()];
            if next < node_deps.len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let dep = node_deps[next];
                match color[dep.index()] {
                    Color::White => {
                        color[dep.index()] = Color::Gray;
                        stack.push((dep, 0));
                    }
                    Color::Gray => {
                        return Err(GraphError::cycle(&graph[node].id, &graph[dep].id));
                    }
                    Color::Black => {}
                }
            } else {
                level[node.index()] = node_deps
                    .iter()
                    .map(|d| level[d.index()] + 1)
                    .max()
                    .unwrap_or(0);
                color[node.index()] = Color::Black;
                order.push(node);
                stack.pop();
            }
        }
    }

    Ok((order, level))
}

/// A validated, leveled task graph. Edges point dependency → dependent.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<DependencyNode, ()>,
    index: HashMap<String, NodeIndex>,
    topo_order: Vec<NodeIndex>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, id: &str) -> Option<&DependencyNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Nodes with every dependency ahead of its dependents.
    pub fn topological_order(&self) -> Vec<&DependencyNode> {
        self.topo_order.iter().map(|&idx| &self.graph[idx]).collect()
    }

    pub fn level_count(&self) -> usize {
        self.nodes().map(|n| n.level + 1).max().unwrap_or(0)
    }

    /// Nodes grouped by level, each level in declaration order.
    pub fn levels(&self) -> Vec<Vec<&DependencyNode>> {
        let mut levels: Vec<Vec<&DependencyNode>> = vec![Vec::new(); self.level_count()];
        for node in self.nodes() {
            levels[node.level].push(node);
        }
        levels
    }

    /// Nodes with neither dependencies nor dependents.
    pub fn orphans(&self) -> Vec<&DependencyNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
                    && self
                        .graph
                        .neighbors_directed(idx, Direction::Outgoing)
                        .next()
                        .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Sum of every node's latency.
    pub fn sequential_latency_ms(&self) -> u64 {
        self.nodes()
            .map(|n| n.estimated_latency_ms)
            .fold(0, u64::saturating_add)
    }

    pub fn total_cost(&self) -> f64 {
        self.nodes().map(|n| n.estimated_cost).sum()
    }

    /// Longest latency-weighted dependency chain: ids from first to last and
    /// the summed latency.
    pub fn critical_path(&self) -> (Vec<String>, u64) {
        let n = self.graph.node_count();
        let mut dist = vec![0u64; n];
        let mut pred: Vec<Option<NodeIndex>> = vec![None; n];

        for &idx in &self.topo_order {
            let node = &self.graph[idx];
            let mut best: Option<(NodeIndex, u64)> = None;
            for dep in &node.dependencies {
                if let Some(&dep_idx) = self.index.get(dep) {
                    let d = dist[dep_idx.index()];
                    if best.map_or(true, |(_, b)| d > b) {
                        best = Some((dep_idx, d));
                    }
                }
            }
            dist[idx.index()] = best
                .map_or(0, |(_, d)| d)
                .saturating_add(node.estimated_latency_ms);
            pred[idx.index()] = best.map(|(p, _)| p);
        }

        let mut end: Option<NodeIndex> = None;
        for &idx in &self.topo_order {
            if end.map_or(true, |e| dist[idx.index()] > dist[e.index()]) {
                end = Some(idx);
            }
        }
        let Some(end) = end else {
            return (Vec::new(), 0);
        };

        let mut path = Vec::new();
        let mut cursor = Some(end);
        while let Some(idx) = cursor {
            path.push(self.graph[idx].id.clone());
            cursor = pred[idx.index()];
        }
        path.reverse();
        (path, dist[end.index()])
    }
}

//! Query optimizer pipeline.
//!
//! # Control flow
//!
//! ```text
//! identify fragments ──► root lookup ──hit──► Resolution::Cached
//!                             │ miss
//!                             ▼
//!                    build task graph (GraphError is the only error)
//!                             │
//!                    route ──► availability check / fallback chain
//!                             │
//!                    quota gate ──► Resolution::Routed { plan, ... }
//! ```
//!
//! Every collaborator is constructed once and injected. Cache faults, probe
//! faults, malformed nodes and quota gate faults degrade to warnings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::{Fragment, FragmentCache};
use crate::dag::{ExecutionPlan, ParallelPlanner, TaskSpec};
use crate::error::OptimizerResult;
use crate::expression::SemanticExpression;
use crate::fingerprint::{Fingerprinter, IdentifiedFragment};
use crate::prober::{AvailabilityProber, DegradedResponse};
use crate::quota::{admit, report_usage, Admission, AllowAllQuota, QuotaGate};
use crate::router::{ModelRouter, Priority, RoutingDecision, RoutingRequest};

/// Token estimate used for quota checks when the caller gives none.
pub const DEFAULT_ESTIMATED_TOKENS: u64 = 1000;

/// Path of the root node in fragment paths.
const ROOT_PATH: &str = "root";

fn anonymous() -> String {
    "anonymous".to_string()
}

/// A query to optimize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    #[serde(default = "anonymous")]
    pub user_id: String,
    pub expression: SemanticExpression,
    /// Sub-tasks for multi-part queries
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub preferred_models: Vec<String>,
    #[serde(default)]
    pub max_cost_per_token: Option<f64>,
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
}

impl OptimizationRequest {
    pub fn new(expression: SemanticExpression) -> Self {
        Self {
            user_id: anonymous(),
            expression,
            tasks: Vec::new(),
            priority: Priority::Balanced,
            requirements: Vec::new(),
            preferred_models: Vec::new(),
            max_cost_per_token: None,
            estimated_tokens: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    fn routing_request(&self) -> RoutingRequest {
        RoutingRequest {
            expression: self.expression.clone(),
            sub_tasks: self.tasks.len(),
            priority: self.priority,
            requirements: self.requirements.clone(),
            preferred_models: self.preferred_models.clone(),
            max_cost_per_token: self.max_cost_per_token,
        }
    }
}

/// Work still to be done for a query that missed the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedQuery {
    pub user_id: String,
    /// Key of the root fragment, when the root is cacheable
    pub root_key: Option<String>,
    pub fragments: Vec<IdentifiedFragment>,
    /// Sub-fragments already available, by fragment path
    pub cached_fragments: HashMap<String, Fragment>,
    pub routing: Option<RoutingDecision>,
    /// Set when the routed model was unreachable and a chain was consulted
    pub availability: Option<DegradedResponse<String>>,
    /// Model the execution layer should use
    pub model_id: String,
    pub estimated_cost: f64,
    pub admission: Admission,
    pub plan: Option<ExecutionPlan>,
    pub warnings: Vec<String>,
}

/// Outcome of [`QueryOptimizer::optimize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    Cached { key: String, fragment: Fragment },
    Routed(Box<RoutedQuery>),
}

impl Resolution {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }

    pub fn routed(&self) -> Option<&RoutedQuery> {
        match self {
            Self::Routed(q) => Some(q),
            Self::Cached { .. } => None,
        }
    }
}

/// Ties cache, router, prober, planner and quota gate together.
pub struct QueryOptimizer {
    fingerprinter: Fingerprinter,
    cache: FragmentCache,
    router: ModelRouter,
    prober: Option<Arc<AvailabilityProber>>,
    planner: ParallelPlanner,
    quota: Arc<dyn QuotaGate>,
    fallback_model: String,
}

impl std::fmt::Debug for QueryOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptimizer")
            .field("cache", &self.cache)
            .field("router", &self.router)
            .field("prober", &self.prober)
            .field("planner", &self.planner)
            .field("fallback_model", &self.fallback_model)
            .finish()
    }
}

impl QueryOptimizer {
    pub fn new(cache: FragmentCache, router: ModelRouter, planner: ParallelPlanner) -> Self {
        Self {
            fingerprinter: Fingerprinter::default(),
            cache,
            router,
            prober: None,
            planner,
            quota: Arc::new(AllowAllQuota),
            fallback_model: crate::config::ProberConfig::default().default_model,
        }
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn with_prober(mut self, prober: Arc<AvailabilityProber>) -> Self {
        self.fallback_model = prober.config().default_model.clone();
        self.prober = Some(prober);
        self
    }

    pub fn with_quota(mut self, quota: Arc<dyn QuotaGate>) -> Self {
        self.quota = quota;
        self
    }

    /// Model used when the catalog is empty and no prober is configured.
    pub fn with_fallback_model(mut self, model_id: impl Into<String>) -> Self {
        self.fallback_model = model_id.into();
        self
    }

    pub fn cache(&self) -> &FragmentCache {
        &self.cache
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Decide what to do with a query. Only structural task-graph faults
    /// are returned as errors.
    pub async fn optimize(&self, request: &OptimizationRequest) -> OptimizerResult<Resolution> {
        let mut warnings = Vec::new();

        let fragments = match self.fingerprinter.identify_fragments(&request.expression) {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::warn!("Fragment identification failed, skipping cache: {}", e);
                warnings.push(format!("fragment identification skipped: {}", e));
                Vec::new()
            }
        };

        let root = fragments
            .iter()
            .find(|f| f.path == ROOT_PATH && f.is_cacheable());
        let root_key = root.map(|f| f.key.clone());
        if let Some(key) = &root_key {
            if let Some(fragment) = self.cache.get(key).await {
                tracing::debug!("Query served from cache: {}", key);
                return Ok(Resolution::Cached {
                    key: key.clone(),
                    fragment,
                });
            }
        }

        let cached_fragments = self.lookup_sub_fragments(&fragments).await;

        let plan = if request.tasks.is_empty() {
            None
        } else {
            Some(self.planner.plan_tasks(&request.tasks)?)
        };
        if let Some(plan) = &plan {
            warnings.extend(plan.validation.warnings.iter().map(|w| w.to_string()));
        }

        let routing = self.router.route(&request.routing_request()).await;
        let mut model_id = match &routing {
            Some(decision) => decision.model_id.clone(),
            None => {
                warnings.push(format!(
                    "catalog empty, using fallback model {}",
                    self.fallback_model
                ));
                self.fallback_model.clone()
            }
        };

        let mut availability = None;
        if let Some(prober) = &self.prober {
            if !prober.is_available(&model_id).await {
                let complexity = routing.as_ref().map_or(0.0, |d| d.complexity);
                let chain = prober.chain_for_complexity(complexity);
                let resolved = prober.resolve(chain).await;
                tracing::warn!(
                    "Routed model {} unavailable, {} chain resolved to {} ({})",
                    model_id,
                    chain,
                    resolved.payload,
                    resolved.level
                );
                warnings.push(format!("{} unavailable, using {}", model_id, resolved.payload));
                warnings.extend(resolved.warnings.iter().cloned());
                model_id = resolved.payload.clone();
                availability = Some(resolved);
            }
        }

        let tokens = request.estimated_tokens.unwrap_or(DEFAULT_ESTIMATED_TOKENS);
        let cost_per_token = match self.router.catalog().get(&model_id).await {
            Some(profile) => profile.cost_per_token(),
            None => routing.as_ref().map_or(0.0, |d| d.cost_per_token),
        };
        let estimated_cost = cost_per_token * tokens as f64;
        let admission = admit(self.quota.as_ref(), &request.user_id, estimated_cost).await;
        if admission == Admission::Unchecked {
            warnings.push("quota gate unavailable, proceeding unchecked".to_string());
        }

        Ok(Resolution::Routed(Box::new(RoutedQuery {
            user_id: request.user_id.clone(),
            root_key,
            fragments,
            cached_fragments,
            routing,
            availability,
            model_id,
            estimated_cost,
            admission,
            plan,
            warnings,
        })))
    }

    async fn lookup_sub_fragments(&self, fragments: &[IdentifiedFragment]) -> HashMap<String, Fragment> {
        let subs: Vec<&IdentifiedFragment> = fragments
            .iter()
            .filter(|f| f.path != ROOT_PATH && f.is_cacheable())
            .collect();
        if subs.is_empty() {
            return HashMap::new();
        }
        let keys: Vec<String> = subs.iter().map(|f| f.key.clone()).collect();
        let found = self.cache.get_many(&keys).await;
        subs.into_iter()
            .zip(found)
            .filter_map(|(f, hit)| hit.map(|fragment| (f.path.clone(), fragment)))
            .collect()
    }

    /// Cache the computed root value. Detached; the handles may be dropped.
    pub fn store_result(&self, query: &RoutedQuery, value: Value) -> Vec<JoinHandle<bool>> {
        self.store_results(query, [(ROOT_PATH.to_string(), value)])
    }

    /// Cache computed values by fragment path. Uncacheable and unknown
    /// paths are ignored.
    pub fn store_results(
        &self,
        query: &RoutedQuery,
        values: impl IntoIterator<Item = (String, Value)>,
    ) -> Vec<JoinHandle<bool>> {
        let by_path: HashMap<&str, &IdentifiedFragment> = query
            .fragments
            .iter()
            .filter(|f| f.is_cacheable())
            .map(|f| (f.path.as_str(), f))
            .collect();
        values
            .into_iter()
            .filter_map(|(path, value)| {
                by_path
                    .get(path.as_str())
                    .map(|f| self.cache.spawn_store((*f).clone(), value))
            })
            .collect()
    }

    /// Report actual usage once the execution layer is done.
    pub async fn complete(&self, query: &RoutedQuery, actual_cost: f64) -> bool {
        report_usage(self.quota.as_ref(), &query.user_id, actual_cost, &query.model_id).await
    }
}

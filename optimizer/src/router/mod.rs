//! Model Router: pick the cheapest catalog model that can handle a query.
//!
//! # Selection
//!
//! ```text
//! preferred_models match? ──yes──► Preferred
//!        │ no
//! requirements filter (matching or general-purpose; empty result → all)
//!        │
//! threshold ≥ complexity ──none──► most capable (CapabilityFallback)
//!        │ some
//! cheapest qualifying (Threshold)
//!        │
//! over max_cost_per_token? ──► cheapest under ceiling (CostCeiling)
//!                              or absolute cheapest (CheapestOverCeiling)
//! ```

pub mod complexity;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::catalog::{ModelCatalog, ModelProfile, ModelTier};
use crate::expression::SemanticExpression;
use crate::provider::ProviderFamily;

pub use complexity::{
    base_score, detect_keywords, ComplexityAnalyzer, ComplexityBreakdown, Priority,
    NESTING_THRESHOLD,
};

/// Input to a routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub expression: SemanticExpression,
    /// Number of declared sub-tasks (0 or 1 means a single task)
    #[serde(default)]
    pub sub_tasks: usize,
    #[serde(default)]
    pub priority: Priority,
    /// Capability keywords, matched against model specializations
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Explicit model preference; the first catalog match wins outright
    #[serde(default)]
    pub preferred_models: Vec<String>,
    #[serde(default)]
    pub max_cost_per_token: Option<f64>,
}

impl RoutingRequest {
    pub fn new(expression: SemanticExpression) -> Self {
        Self {
            expression,
            sub_tasks: 0,
            priority: Priority::Balanced,
            requirements: Vec::new(),
            preferred_models: Vec::new(),
            max_cost_per_token: None,
        }
    }

    pub fn with_sub_tasks(mut self, sub_tasks: usize) -> Self {
        self.sub_tasks = sub_tasks;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn with_preferred_model(mut self, model_id: impl Into<String>) -> Self {
        self.preferred_models.push(model_id.into());
        self
    }

    pub fn with_max_cost_per_token(mut self, ceiling: f64) -> Self {
        self.max_cost_per_token = Some(ceiling);
        self
    }
}

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Preferred,
    Threshold,
    CapabilityFallback,
    CostCeiling,
    CheapestOverCeiling,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preferred => write!(f, "preferred"),
            Self::Threshold => write!(f, "threshold"),
            Self::CapabilityFallback => write!(f, "capability_fallback"),
            Self::CostCeiling => write!(f, "cost_ceiling"),
            Self::CheapestOverCeiling => write!(f, "cheapest_over_ceiling"),
        }
    }
}

/// The router's choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub model_id: String,
    pub provider: String,
    pub family: ProviderFamily,
    pub tier: ModelTier,
    /// Clamped complexity score
    pub complexity: f64,
    pub breakdown: ComplexityBreakdown,
    pub confidence: f64,
    pub strategy: SelectionStrategy,
    pub cost_per_token: f64,
    pub reason: String,
}

impl RoutingDecision {
    /// Unit cost estimate for a call of `tokens` tokens.
    pub fn estimate_call_cost(&self, tokens: u64) -> f64 {
        self.cost_per_token * tokens as f64
    }
}

/// Confidence from the margin between a model's threshold and the query's
/// complexity.
pub fn confidence_for_margin(margin: f64) -> f64 {
    if margin > 0.3 {
        0.95
    } else if margin > 0.1 {
        0.85
    } else if margin > 0.0 {
        0.75
    } else {
        0.65
    }
}

fn by_cost(a: &&ModelProfile, b: &&ModelProfile) -> Ordering {
    a.cost_per_token()
        .total_cmp(&b.cost_per_token())
        .then_with(|| a.model_id.cmp(&b.model_id))
}

fn by_capability(a: &&ModelProfile, b: &&ModelProfile) -> Ordering {
    a.complexity_threshold
        .total_cmp(&b.complexity_threshold)
        .then_with(|| a.scores.reasoning.total_cmp(&b.scores.reasoning))
        // Prefer the lexically smaller id on a full tie.
        .then_with(|| b.model_id.cmp(&a.model_id))
}

/// Pure selection over a profile list. `None` only for an empty list.
pub fn select(
    profiles: &[ModelProfile],
    breakdown: ComplexityBreakdown,
    request: &RoutingRequest,
) -> Option<RoutingDecision> {
    let complexity = breakdown.total;

    let decide = |profile: &ModelProfile, strategy: SelectionStrategy, reason: String| {
        RoutingDecision {
            model_id: profile.model_id.clone(),
            provider: profile.provider.clone(),
            family: profile.family,
            tier: profile.tier,
            complexity,
            breakdown: breakdown.clone(),
            confidence: confidence_for_margin(profile.complexity_threshold - complexity),
            strategy,
            cost_per_token: profile.cost_per_token(),
            reason,
        }
    };

    for preferred in &request.preferred_models {
        if let Some(profile) = profiles.iter().find(|p| &p.model_id == preferred) {
            return Some(decide(
                profile,
                SelectionStrategy::Preferred,
                format!("caller preferred {}", profile.model_id),
            ));
        }
    }

    let mut candidates: Vec<&ModelProfile> = if request.requirements.is_empty() {
        profiles.iter().collect()
    } else {
        profiles
            .iter()
            .filter(|p| {
                p.is_general_purpose() || request.requirements.iter().any(|r| p.matches_requirement(r))
            })
            .collect()
    };
    if candidates.is_empty() {
        tracing::warn!(
            "No model matches requirements {:?}, considering the full catalog",
            request.requirements
        );
        candidates = profiles.iter().collect();
    }

    let qualifying: Vec<&ModelProfile> = candidates
        .iter()
        .copied()
        .filter(|p| p.complexity_threshold >= complexity)
        .collect();

    let (chosen, strategy, reason) = match qualifying.iter().copied().min_by(by_cost) {
        Some(cheapest) => (
            cheapest,
            SelectionStrategy::Threshold,
            format!(
                "cheapest of {} models with threshold >= {:.2}",
                qualifying.len(),
                complexity
            ),
        ),
        None => {
            let capable = candidates.iter().copied().max_by(by_capability)?;
            tracing::warn!(
                "No model rated for complexity {:.2}, falling back to most capable {}",
                complexity,
                capable.model_id
            );
            (
                capable,
                SelectionStrategy::CapabilityFallback,
                format!("no model rated for complexity {:.2}, using most capable", complexity),
            )
        }
    };

    if let Some(ceiling) = request.max_cost_per_token {
        if chosen.cost_per_token() > ceiling {
            let under = candidates
                .iter()
                .copied()
                .filter(|p| p.cost_per_token() <= ceiling)
                .min_by(by_cost);
            return Some(match under {
                Some(profile) => decide(
                    profile,
                    SelectionStrategy::CostCeiling,
                    format!(
                        "{} exceeds cost ceiling {}, using cheapest under it",
                        chosen.model_id, ceiling
                    ),
                ),
                None => {
                    let cheapest = candidates.iter().copied().min_by(by_cost)?;
                    decide(
                        cheapest,
                        SelectionStrategy::CheapestOverCeiling,
                        format!("no model under cost ceiling {}, using cheapest", ceiling),
                    )
                }
            });
        }
    }

    Some(decide(chosen, strategy, reason))
}

/// Routes queries against a shared catalog.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    catalog: Arc<ModelCatalog>,
    analyzer: ComplexityAnalyzer,
}

impl ModelRouter {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self {
            catalog,
            analyzer: ComplexityAnalyzer::default(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: ComplexityAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn analyze(&self, request: &RoutingRequest) -> ComplexityBreakdown {
        self.analyzer
            .analyze(&request.expression, request.sub_tasks, request.priority)
    }

    /// Route a request. `None` only when the catalog is empty.
    pub async fn route(&self, request: &RoutingRequest) -> Option<RoutingDecision> {
        let profiles = self.catalog.profiles().await;
        let breakdown = self.analyze(request);
        let decision = select(&profiles, breakdown, request);
        match &decision {
            Some(d) => tracing::debug!(
                "Routed to {} via {} (complexity {:.2}, confidence {:.2})",
                d.model_id,
                d.strategy,
                d.complexity,
                d.confidence
            ),
            None => tracing::warn!("Catalog is empty, no routing decision possible"),
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CapabilityScores, ModelCapabilities};
    use crate::expression::FrameKind;

    fn profile(id: &str, threshold: f64, cost: f64, specs: &[&str]) -> ModelProfile {
        let capabilities = ModelCapabilities {
            max_tokens: 4096,
            context_window: 100_000,
            cost_per_token: cost,
            avg_latency_ms: 1000,
            specializations: specs.iter().map(|s| s.to_string()).collect(),
            supports_streaming: true,
        };
        ModelProfile {
            model_id: id.to_string(),
            provider: "Test".to_string(),
            family: ProviderFamily::Claude,
            tier: ModelTier::Standard,
            scores: CapabilityScores::derive(threshold, &capabilities),
            capabilities,
            complexity_threshold: threshold,
        }
    }

    fn breakdown(total: f64) -> ComplexityBreakdown {
        ComplexityBreakdown {
            base: total,
            roles: 0.0,
            nesting: 0.0,
            sub_tasks: 0.0,
            keywords: 0.0,
            keyword_hits: Vec::new(),
            priority: 0.0,
            total,
        }
    }

    fn catalog() -> Vec<ModelProfile> {
        vec![
            profile("big", 1.0, 0.00003, &["general", "reasoning"]),
            profile("mid", 0.6, 0.000003, &["general"]),
            profile("small", 0.3, 0.0000005, &["general"]),
            profile("tiny", 0.2, 0.0000001, &["extraction"]),
            profile("coder", 0.8, 0.000002, &["code"]),
        ]
    }

    fn request() -> RoutingRequest {
        RoutingRequest::new(SemanticExpression::new(FrameKind::Query))
    }

    #[test]
    fn test_cheapest_qualifying() {
        let d = select(&catalog(), breakdown(0.25), &request()).unwrap();
        assert_eq!(d.model_id, "small");
        assert_eq!(d.strategy, SelectionStrategy::Threshold);
        assert_eq!(d.confidence, 0.75);
    }

    #[test]
    fn test_capability_fallback() {
        let profiles = vec![profile("a", 0.5, 0.1, &["general"]), profile("b", 0.7, 0.2, &["general"])];
        let d = select(&profiles, breakdown(0.9), &request()).unwrap();
        assert_eq!(d.model_id, "b");
        assert_eq!(d.strategy, SelectionStrategy::CapabilityFallback);
        assert_eq!(d.confidence, 0.65);
    }

    #[test]
    fn test_requirements_filter_keeps_general_models() {
        let req = request().with_requirement("code");
        let d = select(&catalog(), breakdown(0.7), &req).unwrap();
        // coder (0.8, 2e-6) beats big (1.0, 3e-5); tiny is filtered out.
        assert_eq!(d.model_id, "coder");
    }

    #[test]
    fn test_unmatched_requirements_fall_back_to_all() {
        let profiles = vec![profile("only", 0.5, 0.1, &["vision"])];
        let d = select(&profiles, breakdown(0.2), &request().with_requirement("audio")).unwrap();
        assert_eq!(d.model_id, "only");
    }

    #[test]
    fn test_preferred_short_circuits() {
        let req = request()
            .with_preferred_model("missing")
            .with_preferred_model("big")
            .with_max_cost_per_token(0.0);
        let d = select(&catalog(), breakdown(0.1), &req).unwrap();
        assert_eq!(d.model_id, "big");
        assert_eq!(d.strategy, SelectionStrategy::Preferred);
        assert_eq!(d.confidence, 0.95);
    }

    #[test]
    fn test_cost_ceiling_replaces_choice() {
        let req = request().with_max_cost_per_token(0.000001);
        let d = select(&catalog(), breakdown(0.7), &req).unwrap();
        assert_eq!(d.model_id, "tiny");
        assert_eq!(d.strategy, SelectionStrategy::CostCeiling);
    }

    #[test]
    fn test_cheapest_over_ceiling() {
        let req = request().with_max_cost_per_token(0.00000001);
        let d = select(&catalog(), breakdown(0.7), &req).unwrap();
        assert_eq!(d.model_id, "tiny");
        assert_eq!(d.strategy, SelectionStrategy::CheapestOverCeiling);
    }

    #[test]
    fn test_empty_catalog() {
        assert!(select(&[], breakdown(0.5), &request()).is_none());
    }

    #[test]
    fn test_call_cost_estimate() {
        let d = select(&catalog(), breakdown(0.25), &request()).unwrap();
        assert!((d.estimate_call_cost(1000) - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn test_margin_confidence_bands() {
        assert_eq!(confidence_for_margin(0.5), 0.95);
        assert_eq!(confidence_for_margin(0.2), 0.85);
        assert_eq!(confidence_for_margin(0.05), 0.75);
        assert_eq!(confidence_for_margin(0.0), 0.65);
    }

    #[tokio::test]
    async fn test_route_uses_catalog() {
        let router = ModelRouter::new(Arc::new(ModelCatalog::new(catalog())));
        let d = router.route(&request()).await.unwrap();
        // Plain query scores 0.2: "tiny" qualifies and is cheapest.
        assert_eq!(d.model_id, "tiny");
        assert!((d.complexity - 0.2).abs() < 1e-9);
    }
}

//! Subcommand implementations. Every command prints JSON to stdout.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use query_optimizer::cache::{FragmentCache, InMemoryStore};
use query_optimizer::catalog::ModelCatalog;
use query_optimizer::clock::system_clock;
use query_optimizer::fingerprint::{FragmentPolicy, Fingerprinter};
use query_optimizer::provider::{HttpCatalogSource, HttpInvoker};
use query_optimizer::router::{ComplexityAnalyzer, ModelRouter, Priority, RoutingRequest};
use query_optimizer::{
    AvailabilityProber, ChainKind, OptimizationRequest, OptimizerConfig, ParallelPlanner,
    QueryOptimizer, SemanticExpression, TaskSpec,
};

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_expression(path: &Path) -> Result<SemanticExpression> {
    let text = read_input(path)?;
    SemanticExpression::from_json(&text)
        .with_context(|| format!("{} is not a valid expression", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fingerprinter(config: &OptimizerConfig) -> Fingerprinter {
    Fingerprinter::new(FragmentPolicy {
        max_depth: config.cache.max_depth,
        ..FragmentPolicy::default()
    })
}

fn build_catalog(config: &OptimizerConfig) -> Result<Arc<ModelCatalog>> {
    let catalog = ModelCatalog::with_static_defaults();
    if !config.catalog.live_listing {
        return Ok(Arc::new(catalog));
    }
    let source = HttpCatalogSource::new(config.gateway.clone())
        .context("failed to build catalog listing client")?;
    Ok(Arc::new(
        catalog.with_source(Arc::new(source), config.catalog.refresh_interval()),
    ))
}

fn build_prober(config: &OptimizerConfig) -> Result<Arc<AvailabilityProber>> {
    let invoker = HttpInvoker::new(config.gateway.clone())
        .context("failed to build gateway client")?;
    Ok(Arc::new(AvailabilityProber::new(
        Arc::new(invoker),
        config.prober.clone(),
    )))
}

fn build_router(config: &OptimizerConfig) -> Result<ModelRouter> {
    Ok(ModelRouter::new(build_catalog(config)?)
        .with_analyzer(ComplexityAnalyzer::new(config.cache.max_depth)))
}

pub fn build_optimizer(config: &OptimizerConfig) -> Result<QueryOptimizer> {
    let cache = FragmentCache::with_timeout(
        Arc::new(InMemoryStore::new()),
        system_clock(),
        config.cache.operation_timeout(),
    );
    let mut optimizer = QueryOptimizer::new(
        cache,
        build_router(config)?,
        ParallelPlanner::from_config(&config.planner),
    )
    .with_fingerprinter(fingerprinter(config))
    .with_fallback_model(config.prober.default_model.clone());
    if config.prober.enabled {
        optimizer = optimizer.with_prober(build_prober(config)?);
    }
    Ok(optimizer)
}

#[derive(Serialize)]
struct FingerprintOutput {
    key: String,
    fragments: Vec<query_optimizer::IdentifiedFragment>,
}

pub fn fingerprint(config: &OptimizerConfig, input: &Path) -> Result<()> {
    let expr = read_expression(input)?;
    let fp = fingerprinter(config);
    let key = fp.fingerprint(&expr).context("failed to fingerprint expression")?;
    let fragments = fp
        .identify_fragments(&expr)
        .context("failed to identify fragments")?;
    print_json(&FingerprintOutput { key, fragments })
}

pub async fn route(
    config: &OptimizerConfig,
    input: &Path,
    priority: Priority,
    requirements: Vec<String>,
    max_cost_per_token: Option<f64>,
    sub_tasks: usize,
) -> Result<()> {
    let expr = read_expression(input)?;
    let router = build_router(config)?;
    let request = RoutingRequest {
        expression: expr,
        sub_tasks,
        priority,
        requirements,
        preferred_models: Vec::new(),
        max_cost_per_token,
    };
    match router.route(&request).await {
        Some(decision) => {
            tracing::info!(
                model = %decision.model_id,
                strategy = ?decision.strategy,
                complexity = decision.complexity,
                "Routed"
            );
            print_json(&decision)
        }
        None => anyhow::bail!("catalog is empty, nothing to route to"),
    }
}

pub fn plan(config: &OptimizerConfig, input: &Path, schedule: bool) -> Result<()> {
    let text = read_input(input)?;
    let tasks: Vec<TaskSpec> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of tasks", input.display()))?;
    let plan = ParallelPlanner::from_config(&config.planner).plan_tasks(&tasks)?;
    for warning in &plan.validation.warnings {
        tracing::warn!("{}", warning);
    }
    if schedule {
        print_json(&serde_json::json!({
            "plan": plan,
            "schedule": plan.schedule(chrono::Utc::now()),
        }))
    } else {
        print_json(&plan)
    }
}

pub async fn optimize(config: &OptimizerConfig, input: &Path) -> Result<()> {
    let text = read_input(input)?;
    let request: OptimizationRequest = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid optimization request", input.display()))?;
    let optimizer = build_optimizer(config)?;
    let resolution = optimizer.optimize(&request).await?;
    if let Some(routed) = resolution.routed() {
        for warning in &routed.warnings {
            tracing::warn!("{}", warning);
        }
    }
    print_json(&resolution)
}

pub async fn probe(config: &OptimizerConfig, chain: ChainKind) -> Result<()> {
    let prober = build_prober(config)?;
    let resolved = prober.resolve(chain).await;
    tracing::info!(chain = %chain, model = %resolved.payload, level = %resolved.level, "Resolved");
    print_json(&serde_json::json!({
        "selection": resolved,
        "probes": prober.records().await,
    }))
}

pub async fn catalog(config: &OptimizerConfig, refresh: bool) -> Result<()> {
    let catalog = build_catalog(config)?;
    if refresh {
        catalog.force_refresh().await;
    }
    print_json(&catalog.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_expression_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"type": "entity_lookup", "roles": {{"entity": "Paris"}}}}"#).unwrap();
        let expr = read_expression(file.path()).unwrap();
        assert_eq!(expr.role_count(), 1);
    }

    #[test]
    fn test_read_expression_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(read_expression(file.path()).is_err());
    }

    #[tokio::test]
    async fn test_default_optimizer_routes() {
        let optimizer = build_optimizer(&OptimizerConfig::default()).unwrap();
        let expr = SemanticExpression::from_json(r#"{"type": "entity_lookup"}"#).unwrap();
        let resolution = optimizer
            .optimize(&OptimizationRequest::new(expr))
            .await
            .unwrap();
        assert!(!resolution.is_cached());
    }
}

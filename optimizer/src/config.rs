//! Optimizer configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables:
//!
//! - `OPTIMIZER_CACHE_TIMEOUT_MS`: bound on every cache operation (default: 250)
//! - `OPTIMIZER_MAX_DEPTH`: expression nesting limit (default: 32)
//! - `OPTIMIZER_CATALOG_REFRESH_SECS`: live listing refresh interval (default: 3600)
//! - `OPTIMIZER_LIVE_CATALOG`: "1" or "true" to pull the live listing (default: disabled)
//! - `OPTIMIZER_PROBER_ENABLED`: "1" or "true" to probe routed models (default: disabled)
//! - `OPTIMIZER_PROBE_TIMEOUT_MS`: per-probe timeout (default: 10000)
//! - `OPTIMIZER_DEFAULT_MODEL`: soft-fail model when no candidate answers
//! - `PROBER_MODEL_OVERRIDE`: skip probing and always resolve to this model
//! - `OPTIMIZER_MAX_PARALLELISM`: planner global parallelism cap (default: 4)
//! - `OPTIMIZER_GATEWAY_URL`, `OPTIMIZER_GATEWAY_API_KEY`, `OPTIMIZER_GATEWAY_TIMEOUT_MS`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::provider::GatewayConfig;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Fragment cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Bound on each cache get/set/delete, in milliseconds
    pub operation_timeout_ms: u64,
    /// Maximum expression nesting depth walked by the fingerprinter
    pub max_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 250,
            max_depth: crate::expression::DEFAULT_MAX_DEPTH,
        }
    }
}

impl CacheConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Model catalog settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub refresh_interval_secs: u64,
    /// Pull the live provider listing through the gateway
    pub live_listing: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 3600,
            live_listing: false,
        }
    }
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Availability prober settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProberConfig {
    /// Probe routed models before committing to them
    pub enabled: bool,
    /// Priority-ordered candidates for high-reasoning work
    pub reasoning_chain: Vec<String>,
    /// Priority-ordered candidates for fast/cheap work
    pub fast_chain: Vec<String>,
    /// Returned when every candidate fails
    pub default_model: String,
    /// Bypasses probing entirely when set
    pub override_model: Option<String>,
    pub probe_timeout_ms: u64,
    /// How long a successful probe or resolved selection is trusted
    pub success_ttl_secs: u64,
    /// How long a failed probe suppresses retries
    pub failure_ttl_secs: u64,
    /// Complexity at or above which the reasoning chain is used
    pub reasoning_complexity: f64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reasoning_chain: vec![
                "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
                "amazon.nova-pro-v1:0".to_string(),
                "meta.llama3-1-70b-instruct-v1:0".to_string(),
                "mistral.mistral-large-2402-v1:0".to_string(),
                "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            ],
            fast_chain: vec![
                "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
                "amazon.nova-lite-v1:0".to_string(),
                "amazon.nova-micro-v1:0".to_string(),
                "meta.llama3-1-8b-instruct-v1:0".to_string(),
                "mistral.mistral-7b-instruct-v0:2".to_string(),
            ],
            default_model: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            override_model: None,
            probe_timeout_ms: 10_000,
            success_ttl_secs: 300,
            failure_ttl_secs: 600,
            reasoning_complexity: 0.6,
        }
    }
}

impl ProberConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.success_ttl_secs)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }
}

/// Dependency graph and planner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Global cap on concurrently executing nodes
    pub max_parallelism: usize,
    /// Latency for tasks with no token, cost or latency estimate
    pub default_latency_ms: u64,
    /// Latency contributed by each estimated token
    pub latency_per_token_ms: f64,
    /// Cost of each estimated token when a task has no cost estimate
    pub cost_per_token: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 4,
            default_latency_ms: 1000,
            latency_per_token_ms: 2.0,
            cost_per_token: 0.000_001,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub cache: CacheConfig,
    pub catalog: CatalogConfig,
    pub prober: ProberConfig,
    pub planner: PlannerConfig,
    pub gateway: GatewayConfig,
}

fn parse_flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

impl OptimizerConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok());
        config
    }

    /// Read a TOML file, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `OPTIMIZER_*` overrides from an arbitrary variable lookup.
    ///
    /// Unparseable or non-positive numeric values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let positive_u64 = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
        };

        if let Some(v) = positive_u64("OPTIMIZER_CACHE_TIMEOUT_MS") {
            self.cache.operation_timeout_ms = v;
        }
        if let Some(v) = positive_u64("OPTIMIZER_MAX_DEPTH") {
            self.cache.max_depth = v as usize;
        }
        if let Some(v) = positive_u64("OPTIMIZER_CATALOG_REFRESH_SECS") {
            self.catalog.refresh_interval_secs = v;
        }
        if let Some(v) = lookup("OPTIMIZER_LIVE_CATALOG") {
            self.catalog.live_listing = parse_flag(&v);
        }
        if let Some(v) = lookup("OPTIMIZER_PROBER_ENABLED") {
            self.prober.enabled = parse_flag(&v);
        }
        if let Some(v) = positive_u64("OPTIMIZER_PROBE_TIMEOUT_MS") {
            self.prober.probe_timeout_ms = v;
        }
        if let Some(v) = lookup("OPTIMIZER_DEFAULT_MODEL").filter(|v| !v.trim().is_empty()) {
            self.prober.default_model = v.trim().to_string();
        }
        if let Some(v) = lookup("PROBER_MODEL_OVERRIDE").filter(|v| !v.trim().is_empty()) {
            self.prober.override_model = Some(v.trim().to_string());
        }
        if let Some(v) = positive_u64("OPTIMIZER_MAX_PARALLELISM") {
            self.planner.max_parallelism = v as usize;
        }
        if let Some(v) = lookup("OPTIMIZER_GATEWAY_URL").filter(|v| !v.trim().is_empty()) {
            self.gateway.base_url = v.trim().to_string();
        }
        if let Some(v) = lookup("OPTIMIZER_GATEWAY_API_KEY").filter(|v| !v.is_empty()) {
            self.gateway.api_key = Some(v);
        }
        if let Some(v) = positive_u64("OPTIMIZER_GATEWAY_TIMEOUT_MS") {
            self.gateway.timeout_ms = v;
        }
    }

    /// Reject values that would disable a component outright.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.operation_timeout_ms == 0 {
            return Err(ConfigError::invalid("cache.operation_timeout_ms", "must be > 0"));
        }
        if self.cache.max_depth == 0 {
            return Err(ConfigError::invalid("cache.max_depth", "must be > 0"));
        }
        if self.catalog.refresh_interval_secs == 0 {
            return Err(ConfigError::invalid("catalog.refresh_interval_secs", "must be > 0"));
        }
        if self.prober.probe_timeout_ms == 0 {
            return Err(ConfigError::invalid("prober.probe_timeout_ms", "must be > 0"));
        }
        if self.prober.success_ttl_secs == 0 || self.prober.failure_ttl_secs == 0 {
            return Err(ConfigError::invalid("prober.*_ttl_secs", "must be > 0"));
        }
        if self.prober.default_model.trim().is_empty() {
            return Err(ConfigError::invalid("prober.default_model", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.prober.reasoning_complexity) {
            return Err(ConfigError::invalid(
                "prober.reasoning_complexity",
                "must be within [0, 1]",
            ));
        }
        if self.planner.max_parallelism == 0 {
            return Err(ConfigError::invalid("planner.max_parallelism", "must be > 0"));
        }
        if self.planner.default_latency_ms == 0 {
            return Err(ConfigError::invalid("planner.default_latency_ms", "must be > 0"));
        }
        if self.planner.latency_per_token_ms < 0.0 || self.planner.cost_per_token < 0.0 {
            return Err(ConfigError::invalid("planner", "per-token factors must be >= 0"));
        }
        if self.gateway.timeout_ms == 0 {
            return Err(ConfigError::invalid("gateway.timeout_ms", "must be > 0"));
        }
        Ok(())
    }
}

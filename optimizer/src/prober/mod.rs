//! Availability Prober: find a model that actually answers.
//!
//! Two priority-ordered chains (reasoning and fast) are walked strictly in
//! order. Each candidate is checked with a one-token invocation unless a
//! fresh probe record already exists. The first success wins and is cached
//! as the chain's selection; failures are classified and cached too so a
//! broken endpoint is not hammered on every resolution.
//!
//! Resolution never errors. An override short-circuits probing, and an
//! exhausted chain resolves to the configured default with a warning.

pub mod chain;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

use crate::clock::{system_clock, SharedClock};
use crate::config::ProberConfig;
use crate::provider::{InvocationRequest, ModelInvoker, ProviderError};

pub use chain::{DegradationLevel, DegradedResponse, FallbackChain, FallbackTier};

/// Why a probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailureKind {
    QuotaExceeded,
    ProvisionedThroughput,
    AccessDenied,
    NotFound,
    Timeout,
    Generic,
}

impl ProbeFailureKind {
    pub fn classify(error: &ProviderError) -> Self {
        match error {
            ProviderError::Throttled(_) => Self::QuotaExceeded,
            ProviderError::Timeout(_) => Self::Timeout,
            ProviderError::UnknownFamily(_) => Self::NotFound,
            ProviderError::Status { status, body } => Self::classify_status(*status, body),
            ProviderError::Request(message) => Self::classify_message(message),
            ProviderError::MissingField { .. } | ProviderError::Decode(_) => Self::Generic,
        }
    }

    fn classify_status(status: u16, body: &str) -> Self {
        match Self::classify_message(body) {
            Self::Generic => match status {
                429 => Self::QuotaExceeded,
                401 | 403 => Self::AccessDenied,
                404 => Self::NotFound,
                408 | 504 => Self::Timeout,
                _ => Self::Generic,
            },
            kind => kind,
        }
    }

    fn classify_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("provisioned throughput") || lower.contains("on-demand throughput") {
            Self::ProvisionedThroughput
        } else if lower.contains("quota")
            || lower.contains("throttl")
            || lower.contains("too many requests")
            || lower.contains("rate exceeded")
        {
            Self::QuotaExceeded
        } else if lower.contains("access denied")
            || lower.contains("accessdenied")
            || lower.contains("not authorized")
            || lower.contains("don't have access")
        {
            Self::AccessDenied
        } else if lower.contains("not found")
            || lower.contains("does not exist")
            || lower.contains("invalid model")
        {
            Self::NotFound
        } else if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout
        } else {
            Self::Generic
        }
    }

    /// Whether the same model may answer if probed again later.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Timeout | Self::Generic)
    }

    pub fn suggested_action(self) -> &'static str {
        match self {
            Self::QuotaExceeded => "wait for quota reset or request a limit increase",
            Self::ProvisionedThroughput => "purchase provisioned throughput or use an inference profile",
            Self::AccessDenied => "enable model access for this account",
            Self::NotFound => "check the model id and region",
            Self::Timeout => "retry later or raise the probe timeout",
            Self::Generic => "inspect provider logs",
        }
    }
}

impl std::fmt::Display for ProbeFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
            Self::ProvisionedThroughput => write!(f, "provisioned_throughput"),
            Self::AccessDenied => write!(f, "access_denied"),
            Self::NotFound => write!(f, "not_found"),
            Self::Timeout => write!(f, "timeout"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub model_id: String,
    pub available: bool,
    pub failure: Option<ProbeFailureKind>,
    pub message: Option<String>,
    pub latency_ms: u64,
    /// Probe time (ms since epoch)
    pub probed_at_ms: u64,
}

impl ProbeRecord {
    fn reason(&self) -> String {
        match (&self.failure, &self.message) {
            (Some(kind), Some(message)) => format!("{}: {}", kind, message),
            (Some(kind), None) => kind.to_string(),
            _ => "unavailable".to_string(),
        }
    }
}

/// Which priority list to resolve against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    Reasoning,
    Fast,
}

impl std::fmt::Display for ChainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reasoning => write!(f, "reasoning"),
            Self::Fast => write!(f, "fast"),
        }
    }
}

#[derive(Debug, Clone)]
struct Selection {
    response: DegradedResponse<String>,
    resolved_at_ms: u64,
}

/// Probes model endpoints and resolves the best reachable model per chain.
pub struct AvailabilityProber {
    invoker: Arc<dyn ModelInvoker>,
    config: ProberConfig,
    reasoning: FallbackChain,
    fast: FallbackChain,
    records: RwLock<HashMap<String, ProbeRecord>>,
    selections: RwLock<HashMap<ChainKind, Selection>>,
    reasoning_flight: Mutex<()>,
    fast_flight: Mutex<()>,
    clock: SharedClock,
}

impl std::fmt::Debug for AvailabilityProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityProber")
            .field("reasoning", &self.reasoning)
            .field("fast", &self.fast)
            .field("override_model", &self.config.override_model)
            .finish()
    }
}

impl AvailabilityProber {
    pub fn new(invoker: Arc<dyn ModelInvoker>, config: ProberConfig) -> Self {
        Self {
            reasoning: FallbackChain::from_models("reasoning", &config.reasoning_chain),
            fast: FallbackChain::from_models("fast", &config.fast_chain),
            invoker,
            config,
            records: RwLock::new(HashMap::new()),
            selections: RwLock::new(HashMap::new()),
            reasoning_flight: Mutex::new(()),
            fast_flight: Mutex::new(()),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    pub fn chain(&self, kind: ChainKind) -> &FallbackChain {
        match kind {
            ChainKind::Reasoning => &self.reasoning,
            ChainKind::Fast => &self.fast,
        }
    }

    /// Chain to use for a query of the given complexity.
    pub fn chain_for_complexity(&self, complexity: f64) -> ChainKind {
        if complexity >= self.config.reasoning_complexity {
            ChainKind::Reasoning
        } else {
            ChainKind::Fast
        }
    }

    fn record_is_fresh(&self, record: &ProbeRecord, now: u64) -> bool {
        let ttl = if record.available {
            self.config.success_ttl()
        } else {
            self.config.failure_ttl()
        };
        now.saturating_sub(record.probed_at_ms) < ttl.as_millis() as u64
    }

    /// Probe result for a model, reusing a fresh cached record.
    pub async fn probe(&self, model_id: &str) -> ProbeRecord {
        let now = self.clock.now_millis();
        if let Some(record) = self.records.read().await.get(model_id) {
            if self.record_is_fresh(record, now) {
                return record.clone();
            }
        }
        let record = self.probe_uncached(model_id).await;
        self.records
            .write()
            .await
            .insert(model_id.to_string(), record.clone());
        record
    }

    async fn probe_uncached(&self, model_id: &str) -> ProbeRecord {
        let start = Instant::now();
        let request = InvocationRequest::probe();
        let outcome = tokio::time::timeout(
            self.config.probe_timeout(),
            self.invoker.invoke(model_id, &request),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout(self.config.probe_timeout())));
        let latency_ms = start.elapsed().as_millis() as u64;
        let probed_at_ms = self.clock.now_millis();

        match outcome {
            Ok(_) => {
                tracing::debug!("Probe succeeded for {} in {}ms", model_id, latency_ms);
                ProbeRecord {
                    model_id: model_id.to_string(),
                    available: true,
                    failure: None,
                    message: None,
                    latency_ms,
                    probed_at_ms,
                }
            }
            Err(e) => {
                let kind = ProbeFailureKind::classify(&e);
                tracing::warn!(
                    "Probe failed for {} ({}): {}. Suggested action: {}",
                    model_id,
                    kind,
                    e,
                    kind.suggested_action()
                );
                ProbeRecord {
                    model_id: model_id.to_string(),
                    available: false,
                    failure: Some(kind),
                    message: Some(e.to_string()),
                    latency_ms,
                    probed_at_ms,
                }
            }
        }
    }

    /// Whether a model currently answers (probe-cached).
    pub async fn is_available(&self, model_id: &str) -> bool {
        if self.config.override_model.as_deref() == Some(model_id) {
            return true;
        }
        self.probe(model_id).await.available
    }

    /// Resolve the best reachable model of a chain. Never fails.
    pub async fn resolve(&self, kind: ChainKind) -> DegradedResponse<String> {
        if let Some(model) = &self.config.override_model {
            return DegradedResponse::full(model.clone(), "override");
        }
        if let Some(cached) = self.cached_selection(kind).await {
            return cached;
        }

        let flight = match kind {
            ChainKind::Reasoning => &self.reasoning_flight,
            ChainKind::Fast => &self.fast_flight,
        };
        let _guard = flight.lock().await;
        if let Some(cached) = self.cached_selection(kind).await {
            return cached;
        }

        let chain = self.chain(kind);
        let this = self;
        let response = chain
            .execute(move |model_id| async move {
                let record = this.probe(&model_id).await;
                if record.available {
                    Ok(model_id)
                } else {
                    Err(record.reason())
                }
            })
            .await;

        match response.payload.clone() {
            Some(model_id) => {
                tracing::info!(
                    "Resolved {} model: {} ({})",
                    kind,
                    model_id,
                    response.level
                );
                let resolved = response.map(|_| model_id);
                self.selections.write().await.insert(
                    kind,
                    Selection {
                        response: resolved.clone(),
                        resolved_at_ms: self.clock.now_millis(),
                    },
                );
                resolved
            }
            None => {
                tracing::warn!(
                    "No accessible {} model among {} candidates, defaulting to {}",
                    kind,
                    chain.tier_count(),
                    self.config.default_model
                );
                let default_model = self.config.default_model.clone();
                response.map(|_| default_model)
            }
        }
    }

    async fn cached_selection(&self, kind: ChainKind) -> Option<DegradedResponse<String>> {
        let now = self.clock.now_millis();
        let ttl = self.config.success_ttl().as_millis() as u64;
        self.selections
            .read()
            .await
            .get(&kind)
            .filter(|s| now.saturating_sub(s.resolved_at_ms) < ttl)
            .map(|s| s.response.clone())
    }

    pub async fn best_reasoning_model(&self) -> String {
        self.resolve(ChainKind::Reasoning).await.payload
    }

    pub async fn best_fast_model(&self) -> String {
        self.resolve(ChainKind::Fast).await.payload
    }

    /// Snapshot of every cached probe record, sorted by model id.
    pub async fn records(&self) -> Vec<ProbeRecord> {
        let mut records: Vec<ProbeRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        records
    }

    /// Forget every probe result and selection.
    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.selections.write().await.clear();
    }
}

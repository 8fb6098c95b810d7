//! Model profiles: identity, tier, raw capabilities and normalized scores.

use serde::{Deserialize, Serialize};

use super::ModelSummary;
use crate::provider::ProviderFamily;

/// Specialization tag that marks a model as usable for any requirement.
pub const GENERAL_PURPOSE: &str = "general";

/// Cost per token at or above which the cost score bottoms out.
const COST_SCALE: f64 = 0.000_005;
/// Average latency at or above which the speed score bottoms out.
const LATENCY_SCALE_MS: f64 = 3000.0;
/// Context window that earns a full context score.
const CONTEXT_SCALE: f64 = 300_000.0;

/// Price/capability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Economy => write!(f, "economy"),
            Self::Standard => write!(f, "standard"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

/// Raw capabilities of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Context window in tokens
    pub context_window: u32,
    /// USD per token (input/output blended)
    pub cost_per_token: f64,
    /// Average response latency in milliseconds
    pub avg_latency_ms: u64,
    pub specializations: Vec<String>,
    pub supports_streaming: bool,
}

/// Normalized 0-1 scores. Higher is better on every axis, so a cheap model
/// has a high `cost` score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilityScores {
    pub reasoning: f64,
    pub speed: f64,
    pub cost: f64,
    pub context: f64,
}

impl CapabilityScores {
    /// Derive speed/cost/context scores from raw capabilities.
    pub fn derive(reasoning: f64, capabilities: &ModelCapabilities) -> Self {
        Self {
            reasoning: reasoning.clamp(0.0, 1.0),
            speed: (1.0 - capabilities.avg_latency_ms as f64 / LATENCY_SCALE_MS).clamp(0.0, 1.0),
            cost: (1.0 - capabilities.cost_per_token / COST_SCALE).clamp(0.0, 1.0),
            context: (capabilities.context_window as f64 / CONTEXT_SCALE).clamp(0.0, 1.0),
        }
    }
}

/// One invokable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model_id: String,
    pub provider: String,
    pub family: ProviderFamily,
    pub tier: ModelTier,
    pub capabilities: ModelCapabilities,
    pub scores: CapabilityScores,
    /// Highest query complexity this model is trusted with
    pub complexity_threshold: f64,
}

impl ModelProfile {
    pub fn is_general_purpose(&self) -> bool {
        self.capabilities
            .specializations
            .iter()
            .any(|s| s == GENERAL_PURPOSE)
    }

    /// Case-insensitive match of a requirement keyword against specializations.
    pub fn matches_requirement(&self, requirement: &str) -> bool {
        let requirement = requirement.trim();
        self.capabilities
            .specializations
            .iter()
            .any(|s| s.eq_ignore_ascii_case(requirement))
    }

    pub fn cost_per_token(&self) -> f64 {
        self.capabilities.cost_per_token
    }

    /// Profile for a live listing entry the static table does not know.
    ///
    /// Returns `None` for families we cannot talk to or models that do not
    /// produce text.
    pub fn from_summary(summary: &ModelSummary) -> Option<Self> {
        if !summary.is_text_capable() {
            return None;
        }
        let family = ProviderFamily::detect(&summary.model_id)?;
        let id = summary.model_id.to_ascii_lowercase();

        let (tier, threshold, cost_per_token, avg_latency_ms, reasoning) =
            if PREMIUM_HINTS.iter().any(|h| id.contains(h)) {
                (ModelTier::Premium, 0.9, 0.000_003, 2500, 0.9)
            } else if ECONOMY_HINTS.iter().any(|h| id.contains(h)) {
                (ModelTier::Economy, 0.4, 0.000_000_2, 700, 0.5)
            } else {
                (ModelTier::Standard, 0.7, 0.000_001, 1500, 0.7)
            };

        let capabilities = ModelCapabilities {
            max_tokens: 4096,
            context_window: family_context_window(family),
            cost_per_token,
            avg_latency_ms,
            specializations: vec![GENERAL_PURPOSE.to_string()],
            supports_streaming: summary.streaming_supported,
        };
        let provider = if summary.provider.is_empty() {
            family.provider_name().to_string()
        } else {
            summary.provider.clone()
        };

        Some(Self {
            model_id: summary.model_id.clone(),
            provider,
            family,
            tier,
            scores: CapabilityScores::derive(reasoning, &capabilities),
            capabilities,
            complexity_threshold: threshold,
        })
    }
}

const PREMIUM_HINTS: &[&str] = &["opus", "sonnet", "premier", "405b"];
const ECONOMY_HINTS: &[&str] = &[
    "haiku", "micro", "lite", "mini", "light", "express", "1b", "3b", "7b", "8b",
];

fn family_context_window(family: ProviderFamily) -> u32 {
    match family {
        ProviderFamily::Claude => 200_000,
        ProviderFamily::Nova => 300_000,
        ProviderFamily::Titan => 8_192,
        ProviderFamily::Llama => 128_000,
        ProviderFamily::Mistral => 32_000,
        ProviderFamily::Cohere => 128_000,
        ProviderFamily::Ai21 => 256_000,
    }
}

struct StaticEntry {
    model_id: &'static str,
    tier: ModelTier,
    threshold: f64,
    cost_per_token: f64,
    avg_latency_ms: u64,
    max_tokens: u32,
    reasoning: f64,
    specializations: &'static [&'static str],
}

const STATIC_TABLE: &[StaticEntry] = &[
    StaticEntry {
        model_id: "anthropic.claude-3-5-sonnet-20241022-v2:0",
        tier: ModelTier::Premium,
        threshold: 1.0,
        cost_per_token: 0.000_003,
        avg_latency_ms: 2500,
        max_tokens: 8192,
        reasoning: 0.95,
        specializations: &["general", "reasoning", "analysis", "code", "writing"],
    },
    StaticEntry {
        model_id: "anthropic.claude-3-haiku-20240307-v1:0",
        tier: ModelTier::Standard,
        threshold: 0.7,
        cost_per_token: 0.000_000_25,
        avg_latency_ms: 800,
        max_tokens: 4096,
        reasoning: 0.7,
        specializations: &["general", "summarization", "extraction"],
    },
    StaticEntry {
        model_id: "amazon.nova-pro-v1:0",
        tier: ModelTier::Standard,
        threshold: 0.8,
        cost_per_token: 0.000_000_8,
        avg_latency_ms: 1500,
        max_tokens: 5120,
        reasoning: 0.8,
        specializations: &["general", "analysis", "multimodal"],
    },
    StaticEntry {
        model_id: "amazon.nova-lite-v1:0",
        tier: ModelTier::Economy,
        threshold: 0.5,
        cost_per_token: 0.000_000_06,
        avg_latency_ms: 600,
        max_tokens: 5120,
        reasoning: 0.55,
        specializations: &["general", "multimodal", "summarization"],
    },
    StaticEntry {
        model_id: "amazon.nova-micro-v1:0",
        tier: ModelTier::Economy,
        threshold: 0.3,
        cost_per_token: 0.000_000_035,
        avg_latency_ms: 400,
        max_tokens: 5120,
        reasoning: 0.4,
        specializations: &["general", "extraction"],
    },
    StaticEntry {
        model_id: "meta.llama3-1-70b-instruct-v1:0",
        tier: ModelTier::Standard,
        threshold: 0.7,
        cost_per_token: 0.000_000_99,
        avg_latency_ms: 1800,
        max_tokens: 2048,
        reasoning: 0.75,
        specializations: &["general", "code", "reasoning"],
    },
    StaticEntry {
        model_id: "meta.llama3-1-8b-instruct-v1:0",
        tier: ModelTier::Economy,
        threshold: 0.35,
        cost_per_token: 0.000_000_22,
        avg_latency_ms: 700,
        max_tokens: 2048,
        reasoning: 0.45,
        specializations: &["general"],
    },
    StaticEntry {
        model_id: "mistral.mistral-large-2402-v1:0",
        tier: ModelTier::Standard,
        threshold: 0.75,
        cost_per_token: 0.000_004,
        avg_latency_ms: 2000,
        max_tokens: 8192,
        reasoning: 0.8,
        specializations: &["code", "reasoning", "multilingual"],
    },
    StaticEntry {
        model_id: "mistral.mistral-7b-instruct-v0:2",
        tier: ModelTier::Economy,
        threshold: 0.25,
        cost_per_token: 0.000_000_15,
        avg_latency_ms: 500,
        max_tokens: 8192,
        reasoning: 0.35,
        specializations: &["general", "extraction"],
    },
    StaticEntry {
        model_id: "cohere.command-r-plus-v1:0",
        tier: ModelTier::Standard,
        threshold: 0.7,
        cost_per_token: 0.000_003,
        avg_latency_ms: 1700,
        max_tokens: 4096,
        reasoning: 0.7,
        specializations: &["retrieval", "summarization", "rag"],
    },
    StaticEntry {
        model_id: "amazon.titan-text-express-v1",
        tier: ModelTier::Economy,
        threshold: 0.3,
        cost_per_token: 0.000_000_2,
        avg_latency_ms: 900,
        max_tokens: 8192,
        reasoning: 0.35,
        specializations: &["summarization", "extraction"],
    },
    StaticEntry {
        model_id: "ai21.jamba-1-5-mini-v1:0",
        tier: ModelTier::Economy,
        threshold: 0.4,
        cost_per_token: 0.000_000_2,
        avg_latency_ms: 900,
        max_tokens: 4096,
        reasoning: 0.5,
        specializations: &["summarization", "long_context"],
    },
];

/// The compiled-in profile table.
pub fn static_profiles() -> Vec<ModelProfile> {
    STATIC_TABLE
        .iter()
        .filter_map(|entry| {
            let family = ProviderFamily::detect(entry.model_id)?;
            let capabilities = ModelCapabilities {
                max_tokens: entry.max_tokens,
                context_window: family_context_window(family),
                cost_per_token: entry.cost_per_token,
                avg_latency_ms: entry.avg_latency_ms,
                specializations: entry.specializations.iter().map(|s| s.to_string()).collect(),
                supports_streaming: true,
            };
            Some(ModelProfile {
                model_id: entry.model_id.to_string(),
                provider: family.provider_name().to_string(),
                family,
                tier: entry.tier,
                scores: CapabilityScores::derive(entry.reasoning, &capabilities),
                capabilities,
                complexity_threshold: entry.threshold,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_table_is_complete() {
        let profiles = static_profiles();
        assert_eq!(profiles.len(), STATIC_TABLE.len());
        assert!(profiles.iter().any(|p| p.complexity_threshold >= 1.0));
        for p in &profiles {
            assert!((0.0..=1.0).contains(&p.scores.cost), "{}", p.model_id);
            assert!((0.0..=1.0).contains(&p.scores.speed), "{}", p.model_id);
        }
    }

    #[test]
    fn test_requirement_matching() {
        let profiles = static_profiles();
        let cohere = profiles
            .iter()
            .find(|p| p.family == ProviderFamily::Cohere)
            .unwrap();
        assert!(cohere.matches_requirement("RAG"));
        assert!(!cohere.is_general_purpose());
    }

    #[test]
    fn test_scores_favor_cheap_fast_models() {
        let profiles = static_profiles();
        let micro = profiles.iter().find(|p| p.model_id.contains("nova-micro")).unwrap();
        let sonnet = profiles.iter().find(|p| p.model_id.contains("sonnet")).unwrap();
        assert!(micro.scores.cost > sonnet.scores.cost);
        assert!(micro.scores.speed > sonnet.scores.speed);
        assert!(sonnet.scores.reasoning > micro.scores.reasoning);
    }

    #[test]
    fn test_from_summary_derives_tier() {
        let summary = ModelSummary {
            model_id: "anthropic.claude-3-opus-20240229-v1:0".to_string(),
            model_name: "Claude 3 Opus".to_string(),
            provider: "Anthropic".to_string(),
            modalities: vec!["TEXT".to_string()],
            streaming_supported: true,
        };
        let profile = ModelProfile::from_summary(&summary).unwrap();
        assert_eq!(profile.tier, ModelTier::Premium);
        assert_eq!(profile.family, ProviderFamily::Claude);
        assert!(profile.is_general_purpose());
    }

    #[test]
    fn test_from_summary_skips_image_models() {
        let summary = ModelSummary {
            model_id: "amazon.titan-image-generator-v1".to_string(),
            model_name: String::new(),
            provider: String::new(),
            modalities: vec!["IMAGE".to_string()],
            streaming_supported: false,
        };
        assert!(ModelProfile::from_summary(&summary).is_none());
    }
}

//! Ordered fallback chains with degradation metadata.
//!
//! ```text
//! resolve
//!   ├─ first tier succeeds            → DegradedResponse { level: Full }
//!   ├─ a later tier succeeds          → DegradedResponse { level: Partial, warnings }
//!   └─ every tier fails               → DegradedResponse { level: Unavailable }
//! ```
//!
//! Tiers are tried strictly in order and the walk stops at the first success.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// How much of the preferred capability is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// The first-choice tier answered.
    Full,
    /// A lower tier answered.
    Partial,
    /// Nothing answered; the payload is a best-effort default.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A result wrapped with degradation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedResponse<T> {
    pub payload: T,
    pub level: DegradationLevel,
    /// Confidence in the result (0.0-1.0)
    pub confidence: f64,
    /// Which tier produced this result
    pub served_by: String,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> DegradedResponse<T> {
    pub fn full(payload: T, served_by: &str) -> Self {
        Self {
            payload,
            level: DegradationLevel::Full,
            confidence: 1.0,
            served_by: served_by.to_string(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn partial(payload: T, served_by: &str, confidence: f64, warnings: Vec<String>) -> Self {
        Self {
            payload,
            level: DegradationLevel::Partial,
            confidence: confidence.clamp(0.0, 1.0),
            served_by: served_by.to_string(),
            warnings,
            timestamp: Utc::now(),
        }
    }

    pub fn unavailable(payload: T, warnings: Vec<String>) -> Self {
        Self {
            payload,
            level: DegradationLevel::Unavailable,
            confidence: 0.0,
            served_by: "none".to_string(),
            warnings,
            timestamp: Utc::now(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.level == DegradationLevel::Full
    }

    pub fn is_degraded(&self) -> bool {
        self.level != DegradationLevel::Full
    }

    /// Replace the payload, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DegradedResponse<U> {
        DegradedResponse {
            payload: f(self.payload),
            level: self.level,
            confidence: self.confidence,
            served_by: self.served_by,
            warnings: self.warnings,
            timestamp: self.timestamp,
        }
    }
}

/// A tier in a fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackTier {
    pub name: String,
    /// Confidence when this tier serves the result (0.0-1.0)
    pub confidence: f64,
}

/// Ordered chain of tiers, highest preference first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackChain {
    pub name: String,
    pub tiers: Vec<FallbackTier>,
}

impl FallbackChain {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tiers: Vec::new(),
        }
    }

    pub fn add_tier(mut self, name: &str, confidence: f64) -> Self {
        self.tiers.push(FallbackTier {
            name: name.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        });
        self
    }

    /// Chain over model ids with confidence stepping down 0.1 per position
    /// (floor 0.3).
    pub fn from_models(name: &str, model_ids: &[String]) -> Self {
        model_ids
            .iter()
            .enumerate()
            .fold(Self::new(name), |chain, (idx, id)| {
                chain.add_tier(id, (1.0 - 0.1 * idx as f64).max(0.3))
            })
    }

    /// Try each tier in order, returning the first success.
    ///
    /// `try_fn` receives the tier name and resolves to `Ok(result)` or
    /// `Err(reason)`. Later tiers are never attempted once one succeeds.
    pub async fn execute<T, F, Fut>(&self, mut try_fn: F) -> DegradedResponse<Option<T>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut warnings = Vec::new();

        for (idx, tier) in self.tiers.iter().enumerate() {
            match try_fn(tier.name.clone()).await {
                Ok(result) => {
                    if idx == 0 {
                        return DegradedResponse::full(Some(result), &tier.name);
                    }
                    warnings.push(format!(
                        "{}: preferred tier(s) failed, using fallback '{}'",
                        self.name, tier.name
                    ));
                    return DegradedResponse::partial(
                        Some(result),
                        &tier.name,
                        tier.confidence,
                        warnings,
                    );
                }
                Err(reason) => {
                    warnings.push(format!("{} '{}' failed: {}", self.name, tier.name, reason));
                }
            }
        }

        warnings.push(format!(
            "{}: all {} tiers exhausted",
            self.name,
            self.tiers.len()
        ));
        DegradedResponse::unavailable(None, warnings)
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }
}

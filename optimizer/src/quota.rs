//! Quota gate: the narrow interface to the external usage/guardrail service.
//!
//! The optimizer asks before committing to a routed model and reports usage
//! after completion. Accounting itself lives elsewhere. A gate that errors
//! is treated as "allowed" (fail open) with a warning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Quota service unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown user {0}")]
    UnknownUser(String),
}

/// External quota collaborator.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// Whether `user_id` may spend `estimated_cost` more.
    async fn check_allowed(&self, user_id: &str, estimated_cost: f64) -> Result<bool, QuotaError>;

    async fn record_usage(
        &self,
        user_id: &str,
        actual_cost: f64,
        model_id: &str,
    ) -> Result<(), QuotaError>;
}

/// Outcome of asking the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    Denied,
    /// The gate failed; the request proceeds anyway.
    Unchecked,
}

impl Admission {
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Self::Denied)
    }
}

impl std::fmt::Display for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Denied => write!(f, "denied"),
            Self::Unchecked => write!(f, "unchecked"),
        }
    }
}

/// Ask the gate, failing open on error.
pub async fn admit(gate: &dyn QuotaGate, user_id: &str, estimated_cost: f64) -> Admission {
    match gate.check_allowed(user_id, estimated_cost).await {
        Ok(true) => Admission::Allowed,
        Ok(false) => {
            tracing::info!(
                "Quota denied for user {} (estimated cost {:.6})",
                user_id,
                estimated_cost
            );
            Admission::Denied
        }
        Err(e) => {
            tracing::warn!("Quota check failed for user {}, proceeding: {}", user_id, e);
            Admission::Unchecked
        }
    }
}

/// Report usage; failures are logged, never surfaced.
pub async fn report_usage(gate: &dyn QuotaGate, user_id: &str, actual_cost: f64, model_id: &str) -> bool {
    match gate.record_usage(user_id, actual_cost, model_id).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to record usage for user {}: {}", user_id, e);
            false
        }
    }
}

/// Gate that admits everything and discards usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllQuota;

#[async_trait]
impl QuotaGate for AllowAllQuota {
    async fn check_allowed(&self, _user_id: &str, _estimated_cost: f64) -> Result<bool, QuotaError> {
        Ok(true)
    }

    async fn record_usage(
        &self,
        _user_id: &str,
        _actual_cost: f64,
        _model_id: &str,
    ) -> Result<(), QuotaError> {
        Ok(())
    }
}

/// In-process per-user spend limits, for local runs and tests.
#[derive(Debug, Default)]
pub struct BudgetQuota {
    limits: HashMap<String, f64>,
    default_limit: Option<f64>,
    spent: RwLock<HashMap<String, f64>>,
}

impl BudgetQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, user_id: impl Into<String>, limit: f64) -> Self {
        self.limits.insert(user_id.into(), limit);
        self
    }

    /// Limit for users without an explicit one; without it they are unknown.
    pub fn with_default_limit(mut self, limit: f64) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub async fn spent(&self, user_id: &str) -> f64 {
        self.spent.read().await.get(user_id).copied().unwrap_or(0.0)
    }

    fn limit_for(&self, user_id: &str) -> Result<f64, QuotaError> {
        self.limits
            .get(user_id)
            .copied()
            .or(self.default_limit)
            .ok_or_else(|| QuotaError::UnknownUser(user_id.to_string()))
    }
}

#[async_trait]
impl QuotaGate for BudgetQuota {
    async fn check_allowed(&self, user_id: &str, estimated_cost: f64) -> Result<bool, QuotaError> {
        let limit = self.limit_for(user_id)?;
        Ok(self.spent(user_id).await + estimated_cost <= limit)
    }

    async fn record_usage(
        &self,
        user_id: &str,
        actual_cost: f64,
        _model_id: &str,
    ) -> Result<(), QuotaError> {
        self.limit_for(user_id)?;
        *self
            .spent
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert(0.0) += actual_cost;
        Ok(())
    }
}

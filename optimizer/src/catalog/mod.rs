//! Model Capability Catalog: static defaults plus a periodically refreshed
//! live listing.
//!
//! # Design
//!
//! ```text
//!   profiles() ──► refresh_if_stale() ──► [stale?] ──no──► serve last-known set
//!                        │ yes
//!                        ▼
//!                 refresh_lock (single flight, re-check after acquire)
//!                        │
//!                 CatalogSource::list_models()
//!                   ok + non-empty ──► merge with static table ──► Live
//!                   err / empty    ──► static table              ──► Static
//! ```
//!
//! The profile set is read-mostly: readers take the `RwLock` read guard, only
//! the refresh path writes. The attempt time is recorded on failure too, so
//! a broken listing endpoint is retried once per interval, not on every call.

pub mod profile;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::clock::{system_clock, SharedClock};
use crate::provider::ProviderError;

pub use profile::{
    static_profiles, CapabilityScores, ModelCapabilities, ModelProfile, ModelTier,
    GENERAL_PURPOSE,
};

/// Default interval between live listing refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// One entry of a provider's model listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub model_id: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default, alias = "providerName")]
    pub provider: String,
    #[serde(default, alias = "outputModalities")]
    pub modalities: Vec<String>,
    #[serde(default, alias = "responseStreamingSupported")]
    pub streaming_supported: bool,
}

impl ModelSummary {
    /// Listings without modalities are assumed to be text models.
    pub fn is_text_capable(&self) -> bool {
        self.modalities.is_empty()
            || self
                .modalities
                .iter()
                .any(|m| m.eq_ignore_ascii_case("text"))
    }
}

/// Where the live model listing comes from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelSummary>, ProviderError>;
}

/// Origin of the profile set currently served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogOrigin {
    Static,
    Live,
}

impl std::fmt::Display for CatalogOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Point-in-time view of the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub profiles: Vec<ModelProfile>,
    pub source: CatalogOrigin,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CatalogState {
    profiles: Arc<Vec<ModelProfile>>,
    origin: CatalogOrigin,
    refreshed_at_ms: Option<u64>,
    last_attempt_ms: Option<u64>,
}

/// Registry of model profiles.
pub struct ModelCatalog {
    static_profiles: Arc<Vec<ModelProfile>>,
    state: RwLock<CatalogState>,
    refresh_lock: Mutex<()>,
    source: Option<Arc<dyn CatalogSource>>,
    refresh_interval: Duration,
    clock: SharedClock,
}

impl std::fmt::Debug for ModelCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCatalog")
            .field("static_profiles", &self.static_profiles.len())
            .field("has_source", &self.source.is_some())
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

impl ModelCatalog {
    /// Catalog serving exactly `profiles`, with no live source.
    pub fn new(profiles: Vec<ModelProfile>) -> Self {
        let profiles = Arc::new(profiles);
        Self {
            state: RwLock::new(CatalogState {
                profiles: profiles.clone(),
                origin: CatalogOrigin::Static,
                refreshed_at_ms: None,
                last_attempt_ms: None,
            }),
            static_profiles: profiles,
            refresh_lock: Mutex::new(()),
            source: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            clock: system_clock(),
        }
    }

    /// Catalog over the compiled-in table.
    pub fn with_static_defaults() -> Self {
        Self::new(static_profiles())
    }

    pub fn with_source(mut self, source: Arc<dyn CatalogSource>, refresh_interval: Duration) -> Self {
        self.source = Some(source);
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    fn is_stale(&self, state: &CatalogState) -> bool {
        if self.source.is_none() {
            return false;
        }
        match state.last_attempt_ms {
            None => true,
            Some(at) => {
                self.clock.now_millis().saturating_sub(at) >= self.refresh_interval.as_millis() as u64
            }
        }
    }

    /// Profiles to route against, refreshing first when stale.
    pub async fn profiles(&self) -> Arc<Vec<ModelProfile>> {
        self.refresh_if_stale().await;
        self.current().await
    }

    /// Profiles currently served, without touching the source.
    pub async fn current(&self) -> Arc<Vec<ModelProfile>> {
        self.state.read().await.profiles.clone()
    }

    pub async fn get(&self, model_id: &str) -> Option<ModelProfile> {
        self.state
            .read()
            .await
            .profiles
            .iter()
            .find(|p| p.model_id == model_id)
            .cloned()
    }

    /// Refresh from the live source if the interval has elapsed.
    ///
    /// Concurrent callers share one in-flight refresh: whoever waits on the
    /// lock re-checks staleness and returns without fetching again. Returns
    /// `true` when this call performed the fetch.
    pub async fn refresh_if_stale(&self) -> bool {
        if !self.is_stale(&*self.state.read().await) {
            return false;
        }
        let _guard = self.refresh_lock.lock().await;
        if !self.is_stale(&*self.state.read().await) {
            return false;
        }
        self.refresh_locked().await;
        true
    }

    /// Refresh unconditionally (still single-flight).
    pub async fn force_refresh(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await;
    }

    async fn refresh_locked(&self) {
        let Some(source) = &self.source else {
            return;
        };

        let result = source.list_models().await;
        let now = self.clock.now_millis();

        let (profiles, origin) = match result {
            Ok(summaries) => {
                let merged = self.merge(&summaries);
                if merged.is_empty() {
                    tracing::warn!(
                        "Catalog listing returned no usable models ({} entries), serving static table",
                        summaries.len()
                    );
                    (self.static_profiles.clone(), CatalogOrigin::Static)
                } else {
                    tracing::info!(
                        "Catalog refreshed: {} live models from {} listing entries",
                        merged.len(),
                        summaries.len()
                    );
                    (Arc::new(merged), CatalogOrigin::Live)
                }
            }
            Err(e) => {
                tracing::warn!("Catalog refresh failed, serving static table: {}", e);
                (self.static_profiles.clone(), CatalogOrigin::Static)
            }
        };

        let mut state = self.state.write().await;
        state.profiles = profiles;
        state.origin = origin;
        state.last_attempt_ms = Some(now);
        if origin == CatalogOrigin::Live {
            state.refreshed_at_ms = Some(now);
        }
    }

    /// Known ids keep their static profile, unknown text models get a derived one.
    fn merge(&self, summaries: &[ModelSummary]) -> Vec<ModelProfile> {
        let mut merged: Vec<ModelProfile> = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if merged.iter().any(|p| p.model_id == summary.model_id) {
                continue;
            }
            let known = self
                .static_profiles
                .iter()
                .find(|p| p.model_id == summary.model_id)
                .cloned();
            match known.or_else(|| ModelProfile::from_summary(summary)) {
                Some(profile) => merged.push(profile),
                None => tracing::debug!("Skipping listing entry {}", summary.model_id),
            }
        }
        merged
    }

    pub async fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.read().await;
        CatalogSnapshot {
            profiles: state.profiles.as_ref().clone(),
            source: state.origin,
            refreshed_at: state
                .refreshed_at_ms
                .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        result: fn() -> Result<Vec<ModelSummary>, ProviderError>,
    }

    #[async_trait]
    impl CatalogSource for CountingSource {
        async fn list_models(&self) -> Result<Vec<ModelSummary>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            (self.result)()
        }
    }

    fn summary(id: &str) -> ModelSummary {
        ModelSummary {
            model_id: id.to_string(),
            model_name: id.to_string(),
            provider: String::new(),
            modalities: vec!["TEXT".to_string()],
            streaming_supported: true,
        }
    }

    fn live_listing() -> Result<Vec<ModelSummary>, ProviderError> {
        Ok(vec![
            summary("anthropic.claude-3-haiku-20240307-v1:0"),
            summary("meta.llama3-2-3b-instruct-v1:0"),
        ])
    }

    fn failing_listing() -> Result<Vec<ModelSummary>, ProviderError> {
        Err(ProviderError::Request("connection refused".to_string()))
    }

    #[tokio::test]
    async fn test_static_catalog_never_refreshes() {
        let catalog = ModelCatalog::with_static_defaults();
        assert!(!catalog.refresh_if_stale().await);
        assert_eq!(catalog.snapshot().await.source, CatalogOrigin::Static);
    }

    #[tokio::test]
    async fn test_live_refresh_merges_with_static() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            result: live_listing,
        });
        let catalog = ModelCatalog::with_static_defaults()
            .with_source(source.clone(), Duration::from_secs(60));

        let profiles = catalog.profiles().await;
        assert_eq!(profiles.len(), 2);
        let haiku = catalog.get("anthropic.claude-3-haiku-20240307-v1:0").await.unwrap();
        assert_eq!(haiku.tier, ModelTier::Standard);
        let llama = catalog.get("meta.llama3-2-3b-instruct-v1:0").await.unwrap();
        assert_eq!(llama.tier, ModelTier::Economy);

        let snapshot = catalog.snapshot().await;
        assert_eq!(snapshot.source, CatalogOrigin::Live);
        assert!(snapshot.refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_static() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            result: failing_listing,
        });
        let catalog = ModelCatalog::with_static_defaults()
            .with_source(source.clone(), Duration::from_secs(60));

        let profiles = catalog.profiles().await;
        assert_eq!(profiles.len(), static_profiles().len());
        assert!(catalog.snapshot().await.refreshed_at.is_none());

        // Attempt time recorded, so no immediate retry.
        catalog.profiles().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_respects_interval() {
        let clock = Arc::new(ManualClock::new(0));
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            result: live_listing,
        });
        let catalog = ModelCatalog::with_static_defaults()
            .with_source(source.clone(), Duration::from_secs(3600))
            .with_clock(clock.clone());

        assert!(catalog.refresh_if_stale().await);
        clock.advance(Duration::from_secs(1800));
        assert!(!catalog.refresh_if_stale().await);
        clock.advance(Duration::from_secs(1800));
        assert!(catalog.refresh_if_stale().await);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            result: live_listing,
        });
        let catalog = Arc::new(
            ModelCatalog::with_static_defaults().with_source(source.clone(), Duration::from_secs(60)),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                tokio::spawn(async move { catalog.profiles().await.len() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_summary_aliases() {
        let raw = r#"{"modelId":"amazon.nova-lite-v1:0","providerName":"Amazon","outputModalities":["TEXT"],"responseStreamingSupported":true}"#;
        let summary: ModelSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(summary.provider, "Amazon");
        assert!(summary.streaming_supported);
        assert!(summary.is_text_capable());
    }
}

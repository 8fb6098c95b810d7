//! Query Optimizer Library
//!
//! An optimization layer in front of LLM providers. It decides whether a
//! query can be answered from cache, which model should answer it, and how
//! multi-part work can run in parallel. Results are handed to an execution
//! layer; no inference happens here beyond one-token availability probes.
//!
//! # Components
//!
//! ## Fingerprinting and caching
//! - [`fingerprint::Fingerprinter`]: canonical, type-tagged keys for every
//!   cacheable node of a [`expression::SemanticExpression`]
//! - [`cache::FragmentCache`]: best-effort lookup/store over a pluggable
//!   [`cache::CacheStore`], with dependency-based invalidation
//!
//! ## Model selection
//! - [`catalog::ModelCatalog`]: static profiles merged with a periodically
//!   refreshed live listing
//! - [`router::ModelRouter`]: complexity analysis and cheapest-capable
//!   selection under requirements and cost ceilings
//! - [`prober::AvailabilityProber`]: ordered fallback chains checked with
//!   minimal invocations
//!
//! ## Planning
//! - [`dag::GraphBuilder`] and [`dag::ParallelPlanner`]: leveled task graphs,
//!   critical path and speedup estimates
//!
//! ## Pipeline
//! - [`pipeline::QueryOptimizer`]: cache → route → availability → quota →
//!   plan, returning a [`pipeline::Resolution`]
//!
//! # Configuration
//!
//! ```bash
//! # Defaults, then optimizer.toml, then environment overrides
//! OPTIMIZER_PROBER_ENABLED=true OPTIMIZER_GATEWAY_URL=http://gateway:8080 \
//!     optimizer-cli --config optimizer.toml route query.json
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod dag;
pub mod error;
pub mod expression;
pub mod fingerprint;
pub mod pipeline;
pub mod prober;
pub mod provider;
pub mod quota;
pub mod router;

// Re-export key expression and fingerprint types
pub use expression::{ChildFrame, ExpressionError, ExpressionMetadata, FrameKind, SemanticExpression};
pub use fingerprint::{Cacheability, FragmentPolicy, FragmentType, Fingerprinter, IdentifiedFragment};

// Re-export key cache types
pub use cache::{CacheError, CacheStats, CacheStore, Fragment, FragmentCache, InMemoryStore};

// Re-export key catalog and routing types
pub use catalog::{CatalogSource, ModelCatalog, ModelProfile, ModelSummary};
pub use catalog::profile::{ModelCapabilities, ModelTier};
pub use router::{
    ComplexityAnalyzer, ComplexityBreakdown, ModelRouter, Priority, RoutingDecision, RoutingRequest,
    SelectionStrategy,
};

// Re-export key prober and provider types
pub use prober::{AvailabilityProber, ChainKind, DegradationLevel, DegradedResponse, ProbeRecord};
pub use provider::{
    InvocationRequest, InvocationResponse, ModelInvoker, ProviderError, ProviderFamily,
};

// Re-export key planning types
pub use dag::{DependencyGraph, ExecutionPlan, GraphBuilder, GraphError, ParallelPlanner, TaskSpec};

// Re-export pipeline, quota, config and error types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, OptimizerConfig};
pub use error::{OptimizerError, OptimizerResult};
pub use pipeline::{OptimizationRequest, QueryOptimizer, Resolution, RoutedQuery};
pub use quota::{Admission, AllowAllQuota, BudgetQuota, QuotaGate};

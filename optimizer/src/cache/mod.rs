//! Fragment Cache: reuse of previously computed query fragments.
//!
//! # Modules
//!
//! - [`store`] - `CacheStore` backend trait and the in-memory implementation
//! - [`fragment`] - `Fragment` records with TTL and hit tracking
//! - [`fragment_cache`] - `FragmentCache`: miss-on-error lookups, bounded
//!   writes and dependency-based invalidation

pub mod fragment;
pub mod fragment_cache;
pub mod store;

pub use fragment::Fragment;
pub use fragment_cache::{CacheStats, FragmentCache, DEFAULT_OPERATION_TIMEOUT};
pub use store::{CacheError, CacheStore, InMemoryStore};

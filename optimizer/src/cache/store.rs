//! Cache store abstraction and an in-process implementation.
//!
//! The fragment cache assumes a shared key-value store reachable from many
//! process instances. It only ever issues independent single-key
//! operations, so any backend with get/set-with-TTL/delete works.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::clock::{system_clock, SharedClock};

/// Errors from a cache backend. Always recovered as a miss by callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed cache entry for {key}: {message}")]
    Malformed { key: String, message: String },

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Minimal external key-value store interface.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at_ms: u64,
}

/// In-memory store with TTL, driven by an injectable clock.
///
/// Can be switched into a failing mode to exercise the miss-on-error paths.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    clock: SharedClock,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail (or recover).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at_ms > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write a raw value, bypassing the fragment encoding (test helper for
    /// corrupt entries).
    pub async fn insert_raw(&self, key: &str, value: &str, ttl: Duration) {
        let expires_at_ms = expiry(self.clock.now_millis(), ttl);
        self.entries.write().await.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at_ms,
            },
        );
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("in-memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

fn expiry(now_ms: u64, ttl: Duration) -> u64 {
    now_ms.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let now = self.clock.now_millis();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at_ms > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        let expires_at_ms = expiry(self.clock.now_millis(), ttl);
        self.entries.write().await.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryStore::new();
        store.set("k", "v".to_string(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry_uses_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let store = InMemoryStore::with_clock(clock.clone());
        store.set("k", "v".to_string(), Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(9));
        assert!(store.get("k").await.unwrap().is_some());
        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let store = InMemoryStore::new();
        store.set_failing(true);
        assert!(matches!(store.get("k").await, Err(CacheError::Unavailable(_))));
        store.set_failing(false);
        assert!(store.get("k").await.unwrap().is_none());
    }
}

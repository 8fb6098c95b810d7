//! Cached fragment records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::fingerprint::FragmentType;

/// A previously computed result, keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    pub fragment_type: FragmentType,
    pub key: String,
    pub value: Value,
    pub hit_count: u64,
    /// Creation time (ms since epoch)
    pub created_ms: u64,
    /// Last hit time (ms since epoch)
    pub last_accessed_ms: u64,
    /// Time to live in milliseconds
    pub ttl_ms: u64,
    /// Serialized size of `value` in bytes
    pub size: usize,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Fragment {
    pub fn new(
        key: &str,
        value: Value,
        fragment_type: FragmentType,
        ttl: Duration,
        dependencies: Vec<String>,
        now_ms: u64,
    ) -> Self {
        let size = value.to_string().len();
        Self {
            id: Uuid::new_v4(),
            fragment_type,
            key: key.to_string(),
            value,
            hit_count: 0,
            created_ms: now_ms,
            last_accessed_ms: now_ms,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            size,
            dependencies,
        }
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.created_ms.saturating_add(self.ttl_ms)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms()
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_ttl(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at_ms().saturating_sub(now_ms))
    }

    /// Record a cache hit.
    pub fn touch(&mut self, now_ms: u64) {
        self.hit_count += 1;
        self.last_accessed_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_math() {
        let f = Fragment::new(
            "frag:summary:x",
            json!("text"),
            FragmentType::Summary,
            Duration::from_secs(10),
            vec![],
            1_000,
        );
        assert_eq!(f.expires_at_ms(), 11_000);
        assert!(!f.is_expired(10_999));
        assert!(f.is_expired(11_000));
        assert_eq!(f.remaining_ttl(6_000), Duration::from_secs(5));
        assert_eq!(f.remaining_ttl(20_000), Duration::ZERO);
        assert_eq!(f.size, "\"text\"".len());
    }

    #[test]
    fn test_sub_second_ttl_kept_in_record() {
        let f = Fragment::new(
            "frag:context:x",
            json!("text"),
            FragmentType::Context,
            Duration::from_millis(1_500),
            vec![],
            1_000,
        );
        assert_eq!(f.ttl_ms, 1_500);
        assert!(!f.is_expired(2_499));
        assert!(f.is_expired(2_500));

        let text = serde_json::to_string(&f).unwrap();
        let back: Fragment = serde_json::from_str(&text).unwrap();
        assert_eq!(back.expires_at_ms(), 2_500);
    }

    #[test]
    fn test_touch() {
        let mut f = Fragment::new(
            "k",
            json!(1),
            FragmentType::Context,
            Duration::from_secs(1),
            vec![],
            0,
        );
        f.touch(500);
        f.touch(700);
        assert_eq!(f.hit_count, 2);
        assert_eq!(f.last_accessed_ms, 700);
        assert_eq!(f.created_ms, 0);
    }
}

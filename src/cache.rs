// src/cache.rs

use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Distinguished value for cached negative lookups. Callers store this
/// instead of skipping the write, so a repeated miss does not re-issue
/// the upstream call.
pub const MISS_SENTINEL: &str = "__miss__";

/// Best-effort TTL key-value store shared by every component.
///
/// All failures are non-fatal: `get` answers None on any error, `set` and
/// `del` silently no-op. Values are opaque serialized blobs.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Duration);
    async fn del(&self, key: &str);
}

/// In-process TTL store. Entries are dropped lazily on read and swept
/// whenever a write finds the map past its high-water mark.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

const SWEEP_THRESHOLD: usize = 10_000;

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (possibly expired, not yet swept) entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let expired = {
            let map = self.entries.read().ok()?;
            match map.get(key) {
                Some((value, deadline)) if Instant::now() < *deadline => {
                    return Some(value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            if let Ok(mut map) = self.entries.write() {
                map.remove(key);
            }
        }
        None
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let Ok(mut map) = self.entries.write() else {
            return;
        };

        if map.len() >= SWEEP_THRESHOLD {
            let now = Instant::now();
            let before = map.len();
            map.retain(|_, (_, deadline)| *deadline > now);
            debug!(
                "Cache: swept {} expired entries ({} live)",
                before - map.len(),
                map.len()
            );
        }

        map.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
    }

    async fn del(&self, key: &str) {
        if let Ok(mut map) = self.entries.write() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("absent").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_dropped() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn del_removes_entry() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await;
        cache.del("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn negative_sentinel_is_an_ordinary_value() {
        let cache = MemoryCache::new();
        cache.set("cep:00000000", MISS_SENTINEL, Duration::from_secs(60)).await;
        assert_eq!(cache.get("cep:00000000").await.as_deref(), Some(MISS_SENTINEL));
    }
}

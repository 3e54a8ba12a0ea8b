//! Filament Cache Adapters
//!
//! Caching is optional in a mesh; the broker resolves a [`Cacher`] once per
//! configuration load and hands it to callers. The control plane itself never
//! reads or writes cache entries.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// Narrow adapter interface for a cache backend.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Adapter-type name, as used by the configuration resolver.
    fn name(&self) -> &'static str;

    /// Looks up a key; `None` on miss or expiry.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores a value. `ttl` of `None` falls back to the adapter default;
    /// a default of zero means the entry never expires.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Removes a single key.
    async fn del(&self, key: &str);

    /// Removes every key starting with `prefix`.
    async fn clean(&self, prefix: &str);
}

/// Builds the canonical cache key for a call: `service.action:<params hash>`.
pub fn cache_key(service: &str, action: &str, params: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    params.to_string().hash(&mut hasher);
    format!("{}.{}:{:016x}", service, action, hasher.finish())
}

/// Memory cacher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct MemorySettings {
    /// Default entry lifetime in seconds; 0 disables expiry
    pub ttl_secs: u64,
    /// Hard cap on stored entries
    pub max_entries: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            ttl_secs: 0,
            max_entries: 8192,
        }
    }
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

/// Process-local in-memory cache with per-entry expiry and a capacity bound.
///
/// When the capacity is reached the oldest entry is dropped to make room;
/// expired entries are collected lazily as they are touched.
pub struct MemoryCacher {
    settings: MemorySettings,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacher {
    pub fn new(settings: MemorySettings) -> Self {
        Self {
            settings,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn default_ttl(&self) -> Option<Duration> {
        if self.settings.ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.settings.ttl_secs))
        }
    }
}

impl Default for MemoryCacher {
    fn default() -> Self {
        Self::new(MemorySettings::default())
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    fn name(&self) -> &'static str {
        "Memory"
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at.map_or(true, |at| now < at) => {
                    return Some(entry.value.clone());
                }
                Some(_) => {} // expired, fall through to collect it
                None => return None,
            }
        }
        self.entries.write().await.remove(key);
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.or_else(|| self.default_ttl()).map(|ttl| now + ttl);
        let mut entries = self.entries.write().await;

        if entries.len() >= self.settings.max_entries && !entries.contains_key(key) {
            // At capacity: drop expired entries first, then the oldest
            entries.retain(|_, entry| entry.expires_at.map_or(true, |at| now < at));
            if entries.len() >= self.settings.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                expires_at,
            },
        );
    }

    async fn del(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn clean(&self, prefix: &str) {
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
    }
}

/// Disabled cache: every lookup misses, every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCacher;

#[async_trait]
impl Cacher for NullCacher {
    fn name(&self) -> &'static str {
        "Null"
    }

    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) {}

    async fn del(&self, _key: &str) {}

    async fn clean(&self, _prefix: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_stable() {
        let a = cache_key("math", "add", &json!({"a": 1, "b": 2}));
        let b = cache_key("math", "add", &json!({"a": 1, "b": 2}));
        assert_eq!(a, b);
        assert!(a.starts_with("math.add:"));
    }

    #[test]
    fn test_cache_key_differs_by_params() {
        let a = cache_key("math", "add", &json!({"a": 1}));
        let b = cache_key("math", "add", &json!({"a": 2}));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_memory_get_set_del() {
        let cacher = MemoryCacher::default();
        assert_eq!(cacher.get("k").await, None);

        cacher.set("k", json!(42), None).await;
        assert_eq!(cacher.get("k").await, Some(json!(42)));

        cacher.del("k").await;
        assert_eq!(cacher.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let cacher = MemoryCacher::default();
        cacher
            .set("k", json!(1), Some(Duration::from_millis(20)))
            .await;
        assert_eq!(cacher.get("k").await, Some(json!(1)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cacher.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_clean_prefix() {
        let cacher = MemoryCacher::default();
        cacher.set("math.add:1", json!(1), None).await;
        cacher.set("math.add:2", json!(2), None).await;
        cacher.set("users.get:1", json!(3), None).await;

        cacher.clean("math.add:").await;
        assert_eq!(cacher.get("math.add:1").await, None);
        assert_eq!(cacher.get("math.add:2").await, None);
        assert_eq!(cacher.get("users.get:1").await, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_memory_capacity_bound() {
        let cacher = MemoryCacher::new(MemorySettings {
            ttl_secs: 0,
            max_entries: 2,
        });
        cacher.set("a", json!(1), None).await;
        cacher.set("b", json!(2), None).await;
        cacher.set("c", json!(3), None).await;

        let stored = [
            cacher.get("a").await.is_some(),
            cacher.get("b").await.is_some(),
            cacher.get("c").await.is_some(),
        ];
        assert_eq!(stored.iter().filter(|kept| **kept).count(), 2);
        // The newest entry always survives
        assert!(stored[2]);
    }

    #[tokio::test]
    async fn test_null_cacher_never_stores() {
        let cacher = NullCacher;
        cacher.set("k", json!(1), None).await;
        assert_eq!(cacher.get("k").await, None);
    }
}

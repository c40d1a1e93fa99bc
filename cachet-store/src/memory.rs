//! Process-local cache store.

use crate::config::StoreConfig;
use crate::error::CacheResult;
use crate::traits::CacheStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory cache store backed by a shared map.
///
/// Cloning the store yields another handle onto the same map. Expired values
/// are dropped lazily on access, and whenever room is needed under
/// `max_entries`. When the store is full after purging, the oldest insertion
/// is evicted.
#[derive(Clone)]
pub struct InMemoryCache {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    config: StoreConfig,
}

impl InMemoryCache {
    /// Create an unbounded store without a key prefix.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::memory())
    }

    /// Create a store from configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of live (unexpired) values.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    /// Whether the store holds no live values.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired value, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_expired(now));
        before - slots.len()
    }

    fn build_key(&self, key: &str) -> String {
        self.config.build_key(key)
    }

    fn make_room(&self, slots: &mut HashMap<String, Slot>, now: Instant) {
        let Some(max) = self.config.max_entries else {
            return;
        };

        if slots.len() < max {
            return;
        }

        slots.retain(|_, slot| !slot.is_expired(now));

        while slots.len() >= max {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.inserted_at)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    trace!(key = %key, "Evicting oldest cache value");
                    slots.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let key = self.build_key(key);
        let now = Instant::now();

        {
            let slots = self.slots.read().await;
            match slots.get(&key) {
                Some(slot) if !slot.is_expired(now) => return Ok(Some(slot.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut slots = self.slots.write().await;
        if slots.get(&key).is_some_and(|slot| slot.is_expired(now)) {
            slots.remove(&key);
        }
        Ok(None)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let key = self.build_key(key);
        let now = Instant::now();
        let mut slots = self.slots.write().await;

        if !slots.contains_key(&key) {
            self.make_room(&mut slots, now);
        }

        slots.insert(
            key,
            Slot {
                value,
                inserted_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.build_key(key);
        self.slots.write().await.remove(&key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get_json(key).await?.is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut slots = self.slots.write().await;
        match &self.config.key_prefix {
            Some(prefix) => {
                let namespace = format!("{}:", prefix);
                slots.retain(|key, _| !key.starts_with(&namespace));
            }
            None => slots.clear(),
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let key = self.build_key(key);
        let now = Instant::now();
        let slots = self.slots.read().await;

        Ok(slots
            .get(&key)
            .filter(|slot| !slot.is_expired(now))
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new();

        cache.set_json("a", "1".to_string(), None).await.unwrap();
        assert_eq!(cache.get_json("a").await.unwrap(), Some("1".to_string()));
        assert!(cache.exists("a").await.unwrap());

        cache.delete("a").await.unwrap();
        assert_eq!(cache.get_json("a").await.unwrap(), None);
        assert!(!cache.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let cache = InMemoryCache::new();
        assert!(cache.delete("ghost").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_expire() {
        let cache = InMemoryCache::new();
        cache
            .set_json("short", "x".to_string(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get_json("short").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get_json("short").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_reports_remaining_time() {
        let cache = InMemoryCache::new();
        cache
            .set_json("k", "v".to_string(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        cache.set_json("forever", "v".to_string(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(
            cache.ttl("k").await.unwrap(),
            Some(Duration::from_secs(45))
        );
        assert_eq!(cache.ttl("forever").await.unwrap(), None);
        assert_eq!(cache.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_entries_evicts_oldest() {
        let cache = InMemoryCache::with_config(StoreConfig::memory().with_max_entries(2));

        cache.set_json("first", "1".to_string(), None).await.unwrap();
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set_json("second", "2".to_string(), None).await.unwrap();
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set_json("third", "3".to_string(), None).await.unwrap();

        assert!(cache.get_json("first").await.unwrap().is_none());
        assert!(cache.get_json("second").await.unwrap().is_some());
        assert!(cache.get_json("third").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_prefers_expired_values() {
        let cache = InMemoryCache::with_config(StoreConfig::memory().with_max_entries(2));

        cache.set_json("keep", "1".to_string(), None).await.unwrap();
        tokio::time::advance(Duration::from_millis(1)).await;
        cache
            .set_json("stale", "2".to_string(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set_json("new", "3".to_string(), None).await.unwrap();

        assert!(cache.get_json("keep").await.unwrap().is_some());
        assert!(cache.get_json("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = InMemoryCache::with_config(StoreConfig::memory().with_max_entries(1));

        cache.set_json("only", "1".to_string(), None).await.unwrap();
        cache.set_json("only", "2".to_string(), None).await.unwrap();
        assert_eq!(cache.get_json("only").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_clear_respects_prefix() {
        let shared = InMemoryCache::with_config(StoreConfig::memory().with_key_prefix("a"));
        let other = InMemoryCache {
            slots: shared.slots.clone(),
            config: StoreConfig::memory().with_key_prefix("b"),
        };

        shared.set_json("k", "1".to_string(), None).await.unwrap();
        other.set_json("k", "2".to_string(), None).await.unwrap();

        shared.clear().await.unwrap();
        assert!(shared.get_json("k").await.unwrap().is_none());
        assert_eq!(other.get_json("k").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = InMemoryCache::new();
        cache
            .set_json("a", "1".to_string(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        cache.set_json("b", "2".to_string(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let cache = InMemoryCache::new();
        cache.set_json("x", "1".to_string(), None).await.unwrap();
        cache.set_json("z", "3".to_string(), None).await.unwrap();

        let values = cache.get_many(&["x", "y", "z"]).await.unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );

        cache.delete_many(&["x", "z"]).await.unwrap();
        assert!(cache.is_empty().await);
    }
}

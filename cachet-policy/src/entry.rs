//! Stored responses and the adapter over the key-value store.

use crate::error::{PolicyError, PolicyResult};
use crate::key::CacheKey;
use crate::ttl::Ttl;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cachet_core::HttpResponse;
use cachet_store::CacheStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

/// Header marking whether a response came from the cache.
pub const X_CACHE: &str = "X-Cache";

/// A response as kept in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: HashMap<String, String>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    /// Unix seconds
    pub stored_at: u64,
    pub ttl: Ttl,
    /// Request headers the entry was keyed on, lower-cased
    #[serde(default)]
    pub vary: Vec<String>,
}

impl CacheEntry {
    /// Capture a response, stamped with the current time.
    pub fn from_response(response: &HttpResponse, ttl: Ttl, vary: Vec<String>) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at: unix_now(),
            ttl,
            vary,
        }
    }

    /// Seconds since the entry was stored.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.stored_at)
    }

    /// Whether the TTL has elapsed at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        match self.ttl {
            Ttl::Forever => false,
            Ttl::After(ttl) => Duration::from_secs(self.age(now)) >= ttl,
        }
    }

    /// Rebuild the response, marked as a hit with its `Age`.
    pub fn to_response(&self, now: u64) -> HttpResponse {
        let mut response =
            HttpResponse::from_parts(self.status, self.headers.clone(), self.body.clone());
        response.set_header("Age", self.age(now).to_string());
        response.set_header(X_CACHE, "hit");
        response
    }
}

/// Current time in unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

mod base64_body {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Typed access to the key-value store for cache entries.
///
/// Every backend failure, including a timed-out call, surfaces as
/// [`PolicyError::BackendUnavailable`]. Entries that fail to decode are
/// reported as absent.
#[derive(Clone)]
pub struct EntryStore {
    store: Arc<dyn CacheStore>,
    timeout: Option<Duration>,
}

impl EntryStore {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Bound every store call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get(&self, key: &CacheKey) -> PolicyResult<Option<CacheEntry>> {
        let Some(raw) = self.call(self.store.get_json(key.as_str())).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.is_expired(unix_now()) => {
                trace!(key = %key, "Ignoring expired entry");
                Ok(None)
            }
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry, ttl: Ttl) -> PolicyResult<()> {
        let raw = serde_json::to_string(entry)?;
        self.call(self.store.set_json(key.as_str(), raw, ttl.as_duration()))
            .await
    }

    pub async fn delete(&self, key: &CacheKey) -> PolicyResult<()> {
        self.call(self.store.delete(key.as_str())).await
    }

    /// Header names learned from a resource's `Vary`.
    pub async fn learned_vary(&self, key: &CacheKey) -> PolicyResult<Vec<String>> {
        let Some(raw) = self.call(self.store.get_json(key.as_str())).await? else {
            return Ok(Vec::new());
        };

        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Discarding undecodable vary record");
            Vec::new()
        }))
    }

    /// Remember the `Vary` header names of a resource.
    pub async fn remember_vary(&self, key: &CacheKey, headers: &[String], ttl: Ttl) -> PolicyResult<()> {
        let raw = serde_json::to_string(headers)?;
        self.call(self.store.set_json(key.as_str(), raw, ttl.as_duration()))
            .await
    }

    async fn call<T, F>(&self, op: F) -> PolicyResult<T>
    where
        F: Future<Output = cachet_store::CacheResult<T>>,
    {
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, op).await.map_err(|_| {
                PolicyError::BackendUnavailable(format!("store call exceeded {:?}", limit))
            })?,
            None => op.await,
        };

        result.map_err(|e| PolicyError::BackendUnavailable(e.to_string()))
    }
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cachet_store::{CacheError, CacheResult, InMemoryCache};

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get_json(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Connection("down".to_string()))
        }
        async fn set_json(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> CacheResult<()> {
            Err(CacheError::Connection("down".to_string()))
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Connection("down".to_string()))
        }
        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Connection("down".to_string()))
        }
        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
        async fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
            Ok(None)
        }
    }

    struct SlowStore;

    #[async_trait]
    impl CacheStore for SlowStore {
        async fn get_json(&self, _key: &str) -> CacheResult<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn set_json(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> CacheResult<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }
        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Ok(false)
        }
        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
        async fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
            Ok(None)
        }
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::from(s.to_string())
    }

    fn sample() -> CacheEntry {
        let response = HttpResponse::ok()
            .with_header("Content-Type", "application/octet-stream")
            .with_body(vec![0, 159, 146, 150, 255]);
        CacheEntry::from_response(&response, Ttl::seconds(60), vec!["accept".to_string()])
    }

    #[test]
    fn test_entry_json_uses_base64_body() {
        let entry = sample();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["body"], "AJ+Slv8=");
        assert_eq!(json["ttl"], 60);

        let decoded: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_forever_entry_never_expires() {
        let mut entry = sample();
        entry.ttl = Ttl::Forever;
        entry.stored_at = 0;
        assert!(!entry.is_expired(u64::MAX));
    }

    #[test]
    fn test_expiry_and_age() {
        let mut entry = sample();
        entry.stored_at = 1_000;
        assert_eq!(entry.age(1_030), 30);
        assert!(!entry.is_expired(1_059));
        assert!(entry.is_expired(1_060));
    }

    #[test]
    fn test_to_response_marks_hit() {
        let mut entry = sample();
        entry.headers.insert("x-cache".to_string(), "miss".to_string());
        entry.stored_at = 100;

        let response = entry.to_response(142);
        assert_eq!(response.header("X-Cache"), Some("hit"));
        assert_eq!(response.header("Age"), Some("42"));
        assert_eq!(response.body, entry.body);
        assert_eq!(
            response.headers.keys().filter(|k| k.eq_ignore_ascii_case("x-cache")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = EntryStore::new(Arc::new(InMemoryCache::new()));
        let k = key("p:abc");
        let entry = sample();

        store.set(&k, &entry, entry.ttl).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), Some(entry));

        store.delete(&k).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_forever_maps_to_no_backend_expiry() {
        let backend = Arc::new(InMemoryCache::new());
        let store = EntryStore::new(backend.clone());
        let k = key("p:forever");
        let mut entry = sample();
        entry.ttl = Ttl::Forever;

        store.set(&k, &entry, Ttl::Forever).await.unwrap();
        assert_eq!(backend.ttl("p:forever").await.unwrap(), None);
        assert!(backend.exists("p:forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_is_a_miss() {
        let backend = Arc::new(InMemoryCache::new());
        backend.set_json("p:bad", "{oops".to_string(), None).await.unwrap();

        let store = EntryStore::new(backend);
        assert_eq!(store.get(&key("p:bad")).await.unwrap(), None);
        assert!(store.learned_vary(&key("p:bad")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_errors_are_unavailable() {
        let store = EntryStore::new(Arc::new(FailingStore));
        let k = key("p:x");

        assert!(matches!(store.get(&k).await, Err(PolicyError::BackendUnavailable(_))));
        assert!(matches!(
            store.set(&k, &sample(), Ttl::seconds(1)).await,
            Err(PolicyError::BackendUnavailable(_))
        ));
        assert!(matches!(store.delete(&k).await, Err(PolicyError::BackendUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unavailable() {
        let store = EntryStore::new(Arc::new(SlowStore)).with_timeout(Some(Duration::from_millis(50)));
        assert!(matches!(
            store.get(&key("p:slow")).await,
            Err(PolicyError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_vary_records() {
        let store = EntryStore::new(Arc::new(InMemoryCache::new()));
        let k = key("p:vary:1");
        let headers = vec!["accept-language".to_string()];

        store.remember_vary(&k, &headers, Ttl::seconds(60)).await.unwrap();
        assert_eq!(store.learned_vary(&k).await.unwrap(), headers);
    }
}

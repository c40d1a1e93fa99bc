//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value contract every storage backend implements.
///
/// Values are opaque strings (the middleware stores JSON). A `set_json` with a
/// TTL must make the value unavailable to `get_json` once the TTL has elapsed;
/// exact-to-the-millisecond expiry is not required. Writes are expected to be
/// atomic per key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value from the cache.
    ///
    /// Returns `Ok(Some(value))` if the key exists and has not expired,
    /// `Ok(None)` if not found, or an error if the backend failed.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value in the cache.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The serialized value
    /// * `ttl` - Time-to-live; `None` keeps the value until it is deleted or evicted
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key from the cache. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Check if a key exists in the cache.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Clear all keys from the cache.
    ///
    /// **Warning:** This operation may be destructive and affect all keys.
    async fn clear(&self) -> CacheResult<()>;

    /// Get the remaining time-to-live of a key.
    ///
    /// Returns `Ok(None)` if the key has no expiration or doesn't exist.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Get multiple keys in parallel.
    ///
    /// Returns values in the same order as the input keys.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.get_json(key));
        try_join_all(futures).await
    }

    /// Delete multiple keys in parallel.
    async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.delete(key));
        try_join_all(futures).await?;
        Ok(())
    }
}

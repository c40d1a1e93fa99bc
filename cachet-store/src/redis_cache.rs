//! Redis cache store.

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheStore;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tracing::debug;

/// Redis-backed store, shared by every process pointing at the same server.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    config: StoreConfig,
}

impl RedisCache {
    /// Connect to Redis.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cachet_store::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let config = StoreConfig::redis("redis://localhost:6379")?.with_key_prefix("cachet");
    ///     let store = RedisCache::new(config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: StoreConfig) -> CacheResult<Self> {
        if config.backend != StoreBackend::Redis {
            return Err(CacheError::Config(format!(
                "RedisCache needs a Redis configuration, got {}",
                config.backend
            )));
        }

        let client =
            Client::open(config.url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection = tokio::time::timeout(
            config.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| CacheError::Timeout)?
        .map_err(|e| CacheError::Connection(e.to_string()))?;

        debug!(url = %config.url, "Connected to Redis");
        Ok(Self { connection, config })
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn build_key(&self, key: &str) -> String {
        self.config.build_key(key)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&key).await?;
        Ok(value)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        match ttl {
            // SETEX rejects zero, and sub-second TTLs round up.
            Some(ttl) => {
                let millis = ttl.as_millis().max(1) as u64;
                let _: () = conn.pset_ex(&key, value, millis).await?;
            }
            None => {
                let _: () = conn.set(&key, value).await?;
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let _: () = conn.del(&key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(&key).await?;
        Ok(exists)
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();

        let Some(prefix) = &self.config.key_prefix else {
            let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            return Ok(());
        };

        let pattern = format!("{}:*", prefix);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;

        if !keys.is_empty() {
            let _: () = conn.del(keys).await?;
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        let ttl_millis: i64 = redis::cmd("PTTL").arg(&key).query_async(&mut conn).await?;

        match ttl_millis {
            // -2: missing key, -1: no expiration
            millis if millis > 0 => Ok(Some(Duration::from_millis(millis as u64))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_memory_config() {
        let result = RedisCache::new(StoreConfig::memory()).await;
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_build_key() {
        let config = StoreConfig::redis("redis://localhost:6379")
            .unwrap()
            .with_key_prefix("test");

        assert_eq!(config.build_key("key"), "test:key");
    }
}

//! Store configuration types.

use crate::error::{CacheError, CacheResult};
use std::time::Duration;

/// Store backend type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local map
    Memory,
    /// Redis backend
    Redis,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "Memory"),
            StoreBackend::Redis => write!(f, "Redis"),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store backend type
    pub backend: StoreBackend,

    /// Connection URL (empty for the in-memory backend)
    pub url: String,

    /// Namespace prepended to every key handed to the backend
    pub key_prefix: Option<String>,

    /// Maximum number of entries (in-memory backend only)
    pub max_entries: Option<usize>,

    /// Connection timeout
    pub connection_timeout: Duration,
}

impl StoreConfig {
    /// Configuration for the in-memory backend.
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            key_prefix: None,
            max_entries: None,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Create a new Redis store configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachet_store::StoreConfig;
    ///
    /// let config = StoreConfig::redis("redis://localhost:6379").unwrap();
    /// assert_eq!(config.url, "redis://localhost:6379");
    /// ```
    pub fn redis(url: impl Into<String>) -> CacheResult<Self> {
        let url = url.into();
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(CacheError::Config(format!(
                "expected a redis:// or rediss:// URL, got {:?}",
                url
            )));
        }

        Ok(Self {
            backend: StoreBackend::Redis,
            url,
            key_prefix: None,
            max_entries: None,
            connection_timeout: Duration::from_secs(5),
        })
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Bound the number of entries kept by the in-memory backend.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Build the final key with prefix if configured.
    pub fn build_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

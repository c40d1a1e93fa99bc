//! Storage backends for Cachet.
//!
//! The caching middleware never talks to a storage technology directly. It
//! goes through the narrow [`CacheStore`] contract defined here: string values
//! addressed by key, with an optional time-to-live.
//!
//! # Features
//!
//! - `redis` - Enable the Redis backend
//!
//! # Examples
//!
//! ```
//! use cachet_store::*;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryCache::new();
//! store.set_json("greeting", "\"hello\"".to_string(), Some(Duration::from_secs(60))).await?;
//!
//! let value: Option<String> = get(&store, "greeting").await?;
//! assert_eq!(value.as_deref(), Some("hello"));
//! # Ok::<(), CacheError>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod helpers;
pub mod memory;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use config::{StoreBackend, StoreConfig};
pub use error::{CacheError, CacheResult};
pub use helpers::*;
pub use memory::InMemoryCache;
pub use traits::CacheStore;

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{StoreBackend, StoreConfig};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::memory::InMemoryCache;
    pub use crate::traits::CacheStore;

    #[cfg(feature = "redis")]
    pub use crate::redis_cache::RedisCache;
}

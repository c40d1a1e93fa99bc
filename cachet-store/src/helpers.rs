//! Typed helpers over the string-valued store contract.

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheStore;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Get a typed value from the cache.
///
/// A stored value that does not decode as `T` yields
/// [`CacheError::Deserialization`].
pub async fn get<S, T>(store: &S, key: &str) -> CacheResult<Option<T>>
where
    S: CacheStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get_json(key).await? {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| CacheError::Deserialization(e.to_string())),
        None => Ok(None),
    }
}

/// Set a typed value in the cache.
pub async fn set<S, T>(store: &S, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>
where
    S: CacheStore + ?Sized,
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    store.set_json(key, json, ttl).await
}

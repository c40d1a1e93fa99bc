//! Integration tests for cachet-store

use cachet_store::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_store_error_display() {
    let err = CacheError::Connection("Failed to connect".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Failed to connect"));
}

#[tokio::test]
async fn test_shared_handles_see_same_values() {
    let store = InMemoryCache::new();
    let handle = store.clone();

    store.set_json("k", "\"v\"".to_string(), None).await.unwrap();
    let value: Option<String> = get(&handle, "k").await.unwrap();
    assert_eq!(value.as_deref(), Some("v"));
}

#[tokio::test]
async fn test_trait_object_store_across_tasks() {
    let store: Arc<dyn CacheStore> = Arc::new(InMemoryCache::new());

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            set(store.as_ref(), &format!("item:{}", i), &i, None)
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for i in 0..8 {
        let value: Option<i32> = get(store.as_ref(), &format!("item:{}", i)).await.unwrap();
        assert_eq!(value, Some(i));
    }
}

#[tokio::test(start_paused = true)]
async fn test_prefixed_store_expiry() {
    let store = InMemoryCache::with_config(StoreConfig::memory().with_key_prefix("app"));
    set(&store, "session", &"abc", Some(Duration::from_secs(30)))
        .await
        .unwrap();

    assert!(store.exists("session").await.unwrap());
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!store.exists("session").await.unwrap());
}

// Needs a running Redis: cargo test --features redis -- --ignored
#[cfg(feature = "redis")]
#[tokio::test]
#[ignore]
async fn test_redis_cache_set_get() {
    let config = StoreConfig::redis("redis://localhost:6379")
        .unwrap()
        .with_key_prefix("cachet-test");
    let cache = RedisCache::new(config).await.unwrap();

    cache
        .set_json("test_key", "\"test_value\"".to_string(), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    let value: Option<String> = get(&cache, "test_key").await.unwrap();
    assert_eq!(value, Some("test_value".to_string()));

    cache.delete("test_key").await.unwrap();
    assert!(!cache.exists("test_key").await.unwrap());
}

// Cachet - HTTP response caching middleware
//
// This library caches handler responses in a pluggable key-value store,
// driven by path rules, Cache-Control semantics and per-route overrides.

// Re-export core functionality
pub use cachet_core::*;

// Re-export the policy engine and storage backends
pub use cachet_policy;
pub use cachet_store;

pub use cachet_policy::{
    CacheControlMiddleware, CacheInvalidator, CacheMiddleware, CachePolicy, CacheSettings,
    Directives, PolicyError, PolicyResult, RouteOverride, Ttl,
};
pub use cachet_store::{CacheError, CacheResult, CacheStore, InMemoryCache, StoreConfig};

#[cfg(feature = "redis")]
pub use cachet_store::RedisCache;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CacheControlMiddleware,
        CacheInvalidator,
        CacheMiddleware,
        CachePolicy,
        CacheSettings,
        CacheStore,
        Directives,
        Error,
        HttpRequest,
        HttpResponse,
        InMemoryCache,
        Middleware,
        MiddlewareChain,
        PolicyError,
        RouteOverride,
        Ttl,
        handler,
    };

    #[cfg(feature = "redis")]
    pub use crate::RedisCache;
}

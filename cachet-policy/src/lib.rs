//! HTTP response caching policy for Cachet.
//!
//! This crate decides what a caching middleware does with each request:
//!
//! - [`CacheRule`] admits or excludes paths by glob or regex
//! - [`KeyBuilder`] derives stable keys from method, path, query and the
//!   `Vary` headers
//! - [`Directives`] parses, merges and serializes `Cache-Control`
//! - [`RequestCacheability`] and [`ResponseCacheability`] apply RFC 7234
//!   storage rules
//! - [`resolve_ttl`] picks the lifetime of a stored entry
//!
//! [`CacheMiddleware`] ties these together over any
//! [`cachet_store::CacheStore`].
//!
//! # Examples
//!
//! ```
//! use cachet_core::{handler, HttpRequest, HttpResponse, MiddlewareChain};
//! use cachet_policy::prelude::*;
//! use cachet_store::InMemoryCache;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let policy = CachePolicy::builder()
//!     .match_path("/api/*")
//!     .deny_path("/api/session")
//!     .route("/api/constants/*", RouteOverride::new().with_ttl(Ttl::Forever))
//!     .build()?;
//!
//! let mut chain = MiddlewareChain::new();
//! chain.use_middleware(CacheMiddleware::new(policy, Arc::new(InMemoryCache::new())));
//!
//! let app = handler(|_req| async { Ok(HttpResponse::text("3.14159")) });
//! let response = chain
//!     .apply(HttpRequest::new("GET".into(), "/api/constants/pi".into()), app)
//!     .await
//!     .unwrap();
//! assert_eq!(response.header("X-Cache"), Some("miss"));
//! # Ok::<(), PolicyError>(())
//! # });
//! ```

pub mod cacheability;
pub mod config;
pub mod directives;
pub mod entry;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod merge;
pub mod middleware;
pub mod rules;
pub mod ttl;

pub use cacheability::{NotStorableReason, RequestCacheability, ResponseCacheability};
pub use config::{CachePolicy, CachePolicyBuilder, CacheSettings, RouteOverride, RouteSettings};
pub use directives::{DirectiveValue, Directives, Visibility};
pub use entry::{CacheEntry, EntryStore, X_CACHE};
pub use error::{PolicyError, PolicyResult};
pub use invalidation::CacheInvalidator;
pub use key::{CacheKey, KeyBuilder, RequestDescriptor};
pub use merge::{merge, patch_cache_control};
pub use middleware::{CACHE_LAYER_HEADER, CacheControlMiddleware, CacheMiddleware};
pub use rules::{CacheRule, PathPattern};
pub use ttl::{Ttl, resolve_ttl};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CachePolicy, CacheSettings, RouteOverride};
    pub use crate::directives::Directives;
    pub use crate::error::{PolicyError, PolicyResult};
    pub use crate::invalidation::CacheInvalidator;
    pub use crate::middleware::{CacheControlMiddleware, CacheMiddleware};
    pub use crate::rules::CacheRule;
    pub use crate::ttl::Ttl;
}

//! Caching middleware.

use crate::cacheability::{RequestCacheability, ResponseCacheability};
use crate::config::CachePolicy;
use crate::directives::{Directives, MAX_DELTA_SECONDS};
use crate::entry::{CacheEntry, EntryStore, X_CACHE, unix_now};
use crate::invalidation::CacheInvalidator;
use crate::key::CacheKey;
use crate::merge::{apply_directives, merge, patch_cache_control};
use crate::ttl::{Ttl, resolve_ttl};
use async_trait::async_trait;
use cachet_core::{Error, HttpRequest, HttpResponse, Middleware, Next};
use cachet_store::CacheStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};

/// Request header set by a [`CacheMiddleware`] on the request it forwards.
/// A second cache layer further down the chain sees it and steps aside, so
/// one response is never looked up or stored twice.
pub const CACHE_LAYER_HEADER: &str = "X-Cachet-Layer";

/// Serves and stores responses according to a [`CachePolicy`].
///
/// Failures of the store never fail a request: the response is served as if
/// caching were off.
///
/// # Examples
///
/// ```
/// use cachet_core::{handler, HttpRequest, HttpResponse, MiddlewareChain};
/// use cachet_policy::{CacheMiddleware, CachePolicy};
/// use cachet_store::InMemoryCache;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let mut chain = MiddlewareChain::new();
/// chain.use_middleware(CacheMiddleware::new(
///     CachePolicy::default(),
///     Arc::new(InMemoryCache::new()),
/// ));
///
/// let app = handler(|_req| async { Ok(HttpResponse::text("hello")) });
/// let first = chain.apply(HttpRequest::new("GET".into(), "/".into()), app.clone()).await.unwrap();
/// let second = chain.apply(HttpRequest::new("GET".into(), "/".into()), app).await.unwrap();
///
/// assert_eq!(first.header("X-Cache"), Some("miss"));
/// assert_eq!(second.header("X-Cache"), Some("hit"));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct CacheMiddleware {
    policy: Arc<CachePolicy>,
    store: EntryStore,
}

impl CacheMiddleware {
    pub fn new(policy: CachePolicy, store: Arc<dyn CacheStore>) -> Self {
        Self::with_shared_policy(Arc::new(policy), store)
    }

    pub fn with_shared_policy(policy: Arc<CachePolicy>, store: Arc<dyn CacheStore>) -> Self {
        let store = EntryStore::new(store).with_timeout(policy.store_timeout);
        Self { policy, store }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// An invalidator over the same policy and store.
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator::from_parts(self.policy.clone(), self.store.clone())
    }

    async fn learned_vary(&self, head: &HttpRequest) -> (CacheKey, Vec<String>) {
        let keys = &self.policy.keys;
        let vary_key = keys.vary_key(&keys.describe(head, &[]));
        let learned = match self.store.learned_vary(&vary_key).await {
            Ok(learned) => learned,
            Err(e) => {
                warn!(key = %vary_key, error = %e, "Vary lookup failed");
                Vec::new()
            }
        };
        (vary_key, learned)
    }

    /// Pass a state-changing request through, then drop the cached resource
    /// if the handler succeeded.
    async fn send_then_invalidate(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let head = request_head(&req);
        let response = next(mark_cached(req)).await?;

        if (200..400).contains(&response.status) {
            if let Err(e) = self.invalidator().invalidate_resource(&head).await {
                warn!(path = %head.path, error = %e, "Cache invalidation failed");
            }
        }
        Ok(response)
    }

    /// Try to store a response; returns it patched for storage on success, or
    /// untouched when it is not stored.
    async fn store_response(
        &self,
        head: &HttpRequest,
        mut response: HttpResponse,
        route_ttl: Option<Ttl>,
        vary_key: &CacheKey,
        learned: &[String],
    ) -> HttpResponse {
        let policy = &self.policy;

        if let ResponseCacheability::NotStorable(reason) =
            ResponseCacheability::evaluate(head, &response, policy)
        {
            debug!(path = %head.path, status = response.status, reason = %reason, "Response not cacheable");
            return response;
        }

        let directives = Directives::from_response(&response);
        let ttl = resolve_ttl(&directives, route_ttl, policy.default_ttl);
        if ttl.is_zero() {
            debug!(path = %head.path, "Zero TTL, not caching");
            return response;
        }

        let vary = response_vary(&response);
        let recorded = if !vary.is_empty() {
            self.store.remember_vary(vary_key, &vary, ttl).await
        } else if !learned.is_empty() {
            self.store.delete(vary_key).await
        } else {
            Ok(())
        };
        if let Err(e) = recorded {
            warn!(key = %vary_key, error = %e, "Could not record Vary, not caching");
            return response;
        }

        let keys = &policy.keys;
        let descriptor = keys.describe(head, &vary);
        let key = keys.build_key(&descriptor);

        let original_cache_control = response.header("Cache-Control").map(str::to_string);
        if let Some(secs) = ttl.advertised_secs() {
            let lifetime = secs.min(MAX_DELTA_SECONDS);
            if directives.freshness().is_none() {
                let max_age = Directives {
                    max_age: Some(lifetime),
                    ..Directives::default()
                };
                apply_directives(&mut response, &merge(&max_age, &directives));
            }
            if let Some(expires) = SystemTime::now().checked_add(Duration::from_secs(lifetime)) {
                response.set_header("Expires", httpdate::fmt_http_date(expires));
            }
        }
        response.set_header(X_CACHE, "miss");

        let keyed_on = descriptor.vary.into_iter().map(|(name, _)| name).collect();
        let entry = CacheEntry::from_response(&response, ttl, keyed_on);
        match self.store.set(&key, &entry, ttl).await {
            Ok(()) => {
                debug!(key = %key, path = %head.path, ttl = %ttl, "Stored response");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                response.remove_header(X_CACHE);
                response.remove_header("Expires");
                match original_cache_control {
                    Some(value) => response.set_header("Cache-Control", value),
                    None => {
                        response.remove_header("Cache-Control");
                    }
                }
            }
        }
        response
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let policy = self.policy.clone();

        if req.has_header(CACHE_LAYER_HEADER) {
            warn!(path = %req.path, "Request already passed a cache layer, skipping this one");
            return next(req).await;
        }

        if !policy.should_consider(&req.path) {
            trace!(path = %req.path, "Path excluded from caching");
            return next(req).await;
        }

        if !RequestCacheability::is_eligible_method(&req.method) {
            if RequestCacheability::is_invalidating_method(&req.method) {
                return self.send_then_invalidate(req, next).await;
            }
            debug!(method = %req.method, path = %req.path, "Method bypasses cache");
            return next(req).await;
        }

        let request_policy = RequestCacheability::evaluate(&req);
        let head = request_head(&req);
        let req = mark_cached(req);
        let route = policy.route_for(&req.path);
        let (vary_key, learned) = self.learned_vary(&head).await;

        if request_policy.can_serve_from_cache() {
            let key = policy.keys.build_key(&policy.keys.describe(&head, &learned));
            match self.store.get(&key).await {
                Ok(Some(entry)) => {
                    debug!(key = %key, method = %head.method, path = %head.path, "Cache hit");
                    let mut response = entry.to_response(unix_now());
                    if head.method.eq_ignore_ascii_case("HEAD") {
                        response.body.clear();
                    }
                    return Ok(response);
                }
                Ok(None) => {
                    debug!(key = %key, method = %head.method, path = %head.path, "Cache miss");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                }
            }
        } else {
            debug!(path = %head.path, "Request directives skip cache lookup");
        }

        let mut response = next(req).await?;

        if let Some(route) = route {
            if !route.directives.is_empty() {
                patch_cache_control(&mut response, &route.directives);
            }
        }

        if !request_policy.can_write_to_cache() {
            return Ok(response);
        }

        Ok(self
            .store_response(&head, response, route.and_then(|r| r.ttl), &vary_key, &learned)
            .await)
    }
}

/// Merges a fixed directive set into every response's `Cache-Control`.
///
/// Useful on its own to steer downstream caches, or in front of handlers that
/// never set caching headers.
#[derive(Debug, Clone)]
pub struct CacheControlMiddleware {
    directives: Directives,
}

impl CacheControlMiddleware {
    pub fn new(directives: Directives) -> Self {
        Self { directives }
    }

    pub fn directives(&self) -> &Directives {
        &self.directives
    }
}

#[async_trait]
impl Middleware for CacheControlMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let mut response = next(req).await?;
        patch_cache_control(&mut response, &self.directives);
        Ok(response)
    }
}

/// Copy of the request without its body, kept for decisions made after the
/// handler consumed the request.
fn request_head(req: &HttpRequest) -> HttpRequest {
    HttpRequest {
        method: req.method.clone(),
        path: req.path.clone(),
        headers: req.headers.clone(),
        body: Vec::new(),
        query_params: req.query_params.clone(),
    }
}

fn mark_cached(req: HttpRequest) -> HttpRequest {
    req.with_header(CACHE_LAYER_HEADER, "1")
}

/// Lower-cased header names from the response's `Vary`.
fn response_vary(response: &HttpResponse) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    if let Some(vary) = response.header("Vary") {
        for name in vary.split(',') {
            let name = name.trim().to_ascii_lowercase();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

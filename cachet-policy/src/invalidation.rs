//! Removing cached responses on demand.

use crate::config::CachePolicy;
use crate::entry::EntryStore;
use crate::error::{PolicyError, PolicyResult};
use cachet_core::HttpRequest;
use cachet_store::CacheStore;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Deletes the entries a given request would be served from.
///
/// Keys are derived exactly as the middleware derives them, including any
/// `Vary` headers learned for the resource, so the headers passed in select
/// which variant is removed.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    policy: Arc<CachePolicy>,
    store: EntryStore,
}

impl CacheInvalidator {
    pub fn new(policy: Arc<CachePolicy>, store: Arc<dyn CacheStore>) -> Self {
        let store = EntryStore::new(store).with_timeout(policy.store_timeout);
        Self { policy, store }
    }

    pub(crate) fn from_parts(policy: Arc<CachePolicy>, store: EntryStore) -> Self {
        Self { policy, store }
    }

    /// Invalidate the entry for `target` (`path?query`) as requested with
    /// `method` and `headers`. Without a method, both `GET` and `HEAD`
    /// variants are removed.
    pub async fn invalidate(
        &self,
        method: Option<&str>,
        target: &str,
        headers: &HashMap<String, String>,
    ) -> PolicyResult<()> {
        let mut request = HttpRequest::from_target(method.unwrap_or("GET"), target).map_err(|e| {
            PolicyError::Configuration(format!("invalid invalidation target {:?}: {}", target, e))
        })?;
        request.headers = headers.clone();

        match method {
            Some(_) => self.delete_variant(&request).await,
            None => self.invalidate_resource(&request).await,
        }
    }

    /// Invalidate the `GET` and `HEAD` entries for `target`, as requested
    /// without any headers.
    pub async fn invalidate_path(&self, target: &str) -> PolicyResult<()> {
        self.invalidate(None, target, &HashMap::new()).await
    }

    /// Remove the `GET` and `HEAD` entries for the resource `request` names.
    pub(crate) async fn invalidate_resource(&self, request: &HttpRequest) -> PolicyResult<()> {
        let variants: Vec<HttpRequest> = ["GET", "HEAD"]
            .into_iter()
            .map(|method| HttpRequest {
                method: method.to_string(),
                ..request.clone()
            })
            .collect();

        try_join_all(variants.iter().map(|variant| self.delete_variant(variant))).await?;
        Ok(())
    }

    async fn delete_variant(&self, request: &HttpRequest) -> PolicyResult<()> {
        let keys = &self.policy.keys;
        let vary_key = keys.vary_key(&keys.describe(request, &[]));
        let learned = self.store.learned_vary(&vary_key).await?;
        let key = keys.build_key(&keys.describe(request, &learned));

        debug!(key = %key, method = %request.method, path = %request.path, "Invalidating cache entry");
        self.store.delete(&key).await
    }
}

//! Policy configuration.
//!
//! [`CacheSettings`] is the serializable form (TOML or JSON); it compiles into
//! an immutable [`CachePolicy`] shared by every request. [`CachePolicy::builder`]
//! offers the same options programmatically.
//!
//! ```
//! use cachet_policy::config::CacheSettings;
//! use cachet_policy::ttl::Ttl;
//!
//! let settings = CacheSettings::from_toml_str(r#"
//!     key_prefix = "shop"
//!     default_ttl = 60
//!     deny_paths = ["/admin/*"]
//!     vary_headers = ["Accept-Language"]
//!
//!     [[routes]]
//!     pattern = "/catalog/*"
//!     ttl = "forever"
//!     cache_control = { public = true, max-age = 600 }
//! "#).unwrap();
//!
//! let policy = settings.build().unwrap();
//! assert!(!policy.should_consider("/admin/users"));
//! assert_eq!(policy.route_for("/catalog/shoes").unwrap().ttl, Some(Ttl::Forever));
//! ```

use crate::directives::{DirectiveValue, Directives};
use crate::error::{PolicyError, PolicyResult};
use crate::key::KeyBuilder;
use crate::rules::{CacheRule, PathPattern};
use crate::ttl::Ttl;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::trace;

/// Statuses storable unless configured otherwise (RFC 7231 §6.1 "cacheable by
/// default", without 206 since range requests are not reassembled).
pub const DEFAULT_CACHEABLE_STATUS_CODES: [u16; 10] = [200, 203, 204, 300, 301, 404, 405, 410, 414, 501];

pub const DEFAULT_KEY_PREFIX: &str = "cachet";

pub const DEFAULT_TTL: Ttl = Ttl::seconds(300);

/// Responses with larger bodies are passed through uncached.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

// ============================================================================
// Routes
// ============================================================================

/// Per-route caching overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOverride {
    /// TTL used when the response declares no freshness of its own
    pub ttl: Option<Ttl>,
    /// Directives merged into every response of the route
    pub directives: Directives,
    /// Never cache this route
    pub disabled: bool,
    /// Narrows the storable statuses for this route
    pub statuses: Option<Vec<u16>>,
}

impl RouteOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override that turns caching off for the route.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_directives(mut self, directives: Directives) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.statuses = Some(statuses.into());
        self
    }
}

/// Ordered route pattern → override table. The first matching route wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<(PathPattern, RouteOverride)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: PathPattern, route: RouteOverride) {
        self.routes.push((pattern, route));
    }

    /// The override of the first route matching `path`.
    pub fn lookup(&self, path: &str) -> Option<&RouteOverride> {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(pattern, route)| {
                trace!(path = %path, route = %pattern, "Route override matched");
                route
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ============================================================================
// Compiled Policy
// ============================================================================

/// Compiled, immutable caching policy.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Path inclusion and exclusion rules
    pub rule: CacheRule,
    /// Key derivation
    pub keys: KeyBuilder,
    /// TTL when neither the response nor the route declares one
    pub default_ttl: Ttl,
    /// Statuses that may be stored
    pub cacheable_status_codes: Vec<u16>,
    /// Whether the cache is shared between users (`private` is then never stored)
    pub shared: bool,
    /// Largest storable body, in bytes
    pub max_body_size: usize,
    /// Bound on each store call
    pub store_timeout: Option<Duration>,
    /// Per-route overrides
    pub routes: RouteTable,
}

impl CachePolicy {
    pub fn builder() -> CachePolicyBuilder {
        CachePolicyBuilder::default()
    }

    /// Whether caching logic applies to `path`: the path rules admit it and
    /// no disabled route covers it.
    ///
    /// Rules see the path the way the key does, so `/me/` and `//me` are
    /// judged as `/me`.
    pub fn should_consider(&self, path: &str) -> bool {
        let path = self.keys.normalize(path);
        if !self.rule.should_consider(&path) {
            return false;
        }
        !self.routes.lookup(&path).is_some_and(|route| route.disabled)
    }

    /// The override of the first route matching the normalized `path`.
    pub fn route_for(&self, path: &str) -> Option<&RouteOverride> {
        self.routes.lookup(&self.keys.normalize(path))
    }

    /// Whether `status` may be stored, honoring the route's narrowing.
    pub fn is_cacheable_status(&self, status: u16, route: Option<&RouteOverride>) -> bool {
        if !self.cacheable_status_codes.contains(&status) {
            return false;
        }
        match route.and_then(|r| r.statuses.as_ref()) {
            Some(statuses) => statuses.contains(&status),
            None => true,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            rule: CacheRule::allow_all(),
            keys: KeyBuilder::new(DEFAULT_KEY_PREFIX),
            default_ttl: DEFAULT_TTL,
            cacheable_status_codes: DEFAULT_CACHEABLE_STATUS_CODES.to_vec(),
            shared: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            store_timeout: None,
            routes: RouteTable::new(),
        }
    }
}

/// Programmatic builder for [`CachePolicy`].
///
/// Patterns and statuses are validated by [`CachePolicyBuilder::build`].
///
/// ```
/// use cachet_policy::config::{CachePolicy, RouteOverride};
/// use cachet_policy::ttl::Ttl;
///
/// let policy = CachePolicy::builder()
///     .key_prefix("api")
///     .default_ttl(Ttl::seconds(30))
///     .match_path("/api/*")
///     .route("/api/constants/*", RouteOverride::new().with_ttl(Ttl::Forever))
///     .build()
///     .unwrap();
///
/// assert!(policy.should_consider("/api/constants/pi"));
/// ```
#[derive(Debug, Clone)]
pub struct CachePolicyBuilder {
    key_prefix: String,
    default_ttl: Ttl,
    match_paths: Vec<String>,
    deny_paths: Vec<String>,
    vary_headers: Vec<String>,
    cacheable_status_codes: Vec<u16>,
    shared: bool,
    max_body_size: usize,
    normalize_path_case: bool,
    store_timeout: Option<Duration>,
    routes: Vec<(String, RouteOverride)>,
}

impl Default for CachePolicyBuilder {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: DEFAULT_TTL,
            match_paths: Vec::new(),
            deny_paths: Vec::new(),
            vary_headers: Vec::new(),
            cacheable_status_codes: DEFAULT_CACHEABLE_STATUS_CODES.to_vec(),
            shared: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            normalize_path_case: false,
            store_timeout: None,
            routes: Vec::new(),
        }
    }
}

impl CachePolicyBuilder {
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn default_ttl(mut self, ttl: Ttl) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn match_path(mut self, pattern: impl Into<String>) -> Self {
        self.match_paths.push(pattern.into());
        self
    }

    pub fn deny_path(mut self, pattern: impl Into<String>) -> Self {
        self.deny_paths.push(pattern.into());
        self
    }

    pub fn vary_header(mut self, header: impl Into<String>) -> Self {
        self.vary_headers.push(header.into());
        self
    }

    /// Replace the storable status set.
    pub fn cacheable_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.cacheable_status_codes = codes.into();
        self
    }

    /// Whether the cache serves many users. Defaults to `true`.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn normalize_path_case(mut self, enabled: bool) -> Self {
        self.normalize_path_case = enabled;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn route(mut self, pattern: impl Into<String>, route: RouteOverride) -> Self {
        self.routes.push((pattern.into(), route));
        self
    }

    /// Validate and compile.
    pub fn build(self) -> PolicyResult<CachePolicy> {
        if let Some(bad) = self
            .cacheable_status_codes
            .iter()
            .chain(self.routes.iter().flat_map(|(_, r)| r.statuses.iter().flatten()))
            .find(|status| !(100..=599).contains(*status))
        {
            return Err(PolicyError::Configuration(format!(
                "invalid status code {}",
                bad
            )));
        }

        if let Some(bad) = self.vary_headers.iter().find(|h| !is_header_name(h)) {
            return Err(PolicyError::Configuration(format!(
                "invalid vary header name {:?}",
                bad
            )));
        }

        let mut routes = RouteTable::new();
        for (pattern, route) in self.routes {
            routes.insert(PathPattern::parse(&pattern)?, route);
        }

        Ok(CachePolicy {
            rule: CacheRule::from_patterns(&self.match_paths, &self.deny_paths)?,
            keys: KeyBuilder::new(self.key_prefix)
                .with_vary_headers(&self.vary_headers)
                .with_path_case_normalization(self.normalize_path_case),
            default_ttl: self.default_ttl,
            cacheable_status_codes: self.cacheable_status_codes,
            shared: self.shared,
            max_body_size: self.max_body_size,
            store_timeout: self.store_timeout,
            routes,
        })
    }
}

fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

// ============================================================================
// Serializable Settings
// ============================================================================

/// Serializable cache settings.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub key_prefix: String,
    /// Seconds, or `"forever"`
    pub default_ttl: Ttl,
    pub match_paths: Vec<String>,
    pub deny_paths: Vec<String>,
    pub vary_headers: Vec<String>,
    pub cacheable_status_codes: Vec<u16>,
    pub shared: bool,
    pub max_body_size: usize,
    pub normalize_path_case: bool,
    pub store_timeout_ms: Option<u64>,
    pub routes: Vec<RouteSettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: DEFAULT_TTL,
            match_paths: Vec::new(),
            deny_paths: Vec::new(),
            vary_headers: Vec::new(),
            cacheable_status_codes: DEFAULT_CACHEABLE_STATUS_CODES.to_vec(),
            shared: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            normalize_path_case: false,
            store_timeout_ms: None,
            routes: Vec::new(),
        }
    }
}

/// Serializable route override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSettings {
    pub pattern: String,
    #[serde(default)]
    pub ttl: Option<Ttl>,
    /// Directive name → `true`/`false` for flags, seconds for valued directives
    #[serde(default)]
    pub cache_control: BTreeMap<String, DirectiveValue>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub statuses: Option<Vec<u16>>,
}

impl CacheSettings {
    pub fn from_toml_str(content: &str) -> PolicyResult<Self> {
        toml::from_str(content)
            .map_err(|e| PolicyError::Configuration(format!("TOML parse error: {}", e)))
    }

    pub fn from_json_str(content: &str) -> PolicyResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| PolicyError::Configuration(format!("JSON parse error: {}", e)))
    }

    /// Load a `.toml` or `.json` file, picking the format from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PolicyError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_str(&content),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&content),
            other => Err(PolicyError::Configuration(format!(
                "unsupported configuration format: {:?}",
                other
            ))),
        }
    }

    /// Validate and compile into a [`CachePolicy`].
    pub fn build(&self) -> PolicyResult<CachePolicy> {
        let mut builder = CachePolicy::builder()
            .key_prefix(self.key_prefix.clone())
            .default_ttl(self.default_ttl)
            .cacheable_status_codes(self.cacheable_status_codes.clone())
            .shared(self.shared)
            .max_body_size(self.max_body_size)
            .normalize_path_case(self.normalize_path_case);

        for pattern in &self.match_paths {
            builder = builder.match_path(pattern.clone());
        }
        for pattern in &self.deny_paths {
            builder = builder.deny_path(pattern.clone());
        }
        for header in &self.vary_headers {
            builder = builder.vary_header(header.clone());
        }
        if let Some(ms) = self.store_timeout_ms {
            builder = builder.store_timeout(Duration::from_millis(ms));
        }

        for route in &self.routes {
            let directives = Directives::from_mapping(
                route
                    .cache_control
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.clone())),
            )
            .map_err(|e| {
                PolicyError::Configuration(format!("route {:?}: {}", route.pattern, e))
            })?;

            builder = builder.route(
                route.pattern.clone(),
                RouteOverride {
                    ttl: route.ttl,
                    directives,
                    disabled: route.disabled,
                    statuses: route.statuses.clone(),
                },
            );
        }

        builder.build()
    }
}

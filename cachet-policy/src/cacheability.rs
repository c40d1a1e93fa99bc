//! Request and response cacheability (RFC 7234 §3 and §5.2).

use crate::config::CachePolicy;
use crate::directives::{Directives, Visibility};
use cachet_core::{HttpRequest, HttpResponse};
use std::fmt;
use std::time::Duration;

/// Methods whose successful responses invalidate the cached resource.
pub const INVALIDATING_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Whether a request may read from and write to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestCacheability {
    serve: bool,
    write: bool,
}

impl RequestCacheability {
    /// Judge a request by its method and cache-control semantics.
    ///
    /// - only `GET` and `HEAD` touch the cache at all
    /// - `no-cache` (or `Pragma: no-cache` with no `Cache-Control`) skips the
    ///   read but still allows the fresh response to be written
    /// - `no-store` disables both
    pub fn evaluate(request: &HttpRequest) -> Self {
        if !Self::is_eligible_method(&request.method) {
            return Self {
                serve: false,
                write: false,
            };
        }

        let (no_cache, no_store) = match request.header("Cache-Control") {
            Some(header) => {
                let cc = Directives::parse(header);
                (cc.no_cache, cc.no_store)
            }
            None => {
                let pragma_no_cache = request.header("Pragma").is_some_and(|pragma| {
                    pragma
                        .split(',')
                        .any(|token| token.trim().eq_ignore_ascii_case("no-cache"))
                });
                (pragma_no_cache, false)
            }
        };

        Self {
            serve: !no_cache && !no_store,
            write: !no_store,
        }
    }

    pub fn can_serve_from_cache(&self) -> bool {
        self.serve
    }

    pub fn can_write_to_cache(&self) -> bool {
        self.write
    }

    /// `GET` and `HEAD`, case-insensitively.
    pub fn is_eligible_method(method: &str) -> bool {
        method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
    }

    /// `POST`, `PUT`, `PATCH` and `DELETE`.
    pub fn is_invalidating_method(method: &str) -> bool {
        INVALIDATING_METHODS
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Why a response was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotStorableReason {
    Status(u16),
    NoStore,
    Private,
    NoCache,
    VaryStar,
    BodyTooLarge { size: usize, limit: usize },
    SetCookie,
    Authorization,
}

impl fmt::Display for NotStorableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotStorableReason::Status(status) => write!(f, "status {} is not cacheable", status),
            NotStorableReason::NoStore => write!(f, "response has no-store"),
            NotStorableReason::Private => write!(f, "private response on a shared cache"),
            NotStorableReason::NoCache => write!(f, "response has no-cache"),
            NotStorableReason::VaryStar => write!(f, "response varies on *"),
            NotStorableReason::BodyTooLarge { size, limit } => {
                write!(f, "body of {} bytes exceeds {} bytes", size, limit)
            }
            NotStorableReason::SetCookie => write!(f, "response sets a cookie"),
            NotStorableReason::Authorization => {
                write!(f, "authorized request without explicit shared caching")
            }
        }
    }
}

/// Storability verdict for a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCacheability {
    /// May be stored; `freshness` is the response's own lifetime, if declared
    Storable { freshness: Option<Duration> },
    NotStorable(NotStorableReason),
}

impl ResponseCacheability {
    /// Judge a response to `request` under `policy`.
    ///
    /// `no-cache` responses are treated as not storable, since stored entries
    /// are never revalidated.
    pub fn evaluate(request: &HttpRequest, response: &HttpResponse, policy: &CachePolicy) -> Self {
        use NotStorableReason::*;

        let route = policy.route_for(&request.path);
        if !policy.is_cacheable_status(response.status, route) {
            return Self::NotStorable(Status(response.status));
        }

        let cc = Directives::from_response(response);
        if cc.no_store {
            return Self::NotStorable(NoStore);
        }
        if policy.shared && cc.visibility == Visibility::Private {
            return Self::NotStorable(Private);
        }
        if cc.no_cache {
            return Self::NotStorable(NoCache);
        }

        if response
            .header("Vary")
            .is_some_and(|vary| vary.split(',').any(|name| name.trim() == "*"))
        {
            return Self::NotStorable(VaryStar);
        }

        if response.body.len() > policy.max_body_size {
            return Self::NotStorable(BodyTooLarge {
                size: response.body.len(),
                limit: policy.max_body_size,
            });
        }

        // A cookie minted for a cookieless visitor would be replayed to everyone.
        if response.header("Set-Cookie").is_some() && !request.has_header("Cookie") {
            return Self::NotStorable(SetCookie);
        }

        if policy.shared
            && request.has_header("Authorization")
            && cc.visibility != Visibility::Public
            && cc.s_maxage.is_none()
            && !cc.must_revalidate
        {
            return Self::NotStorable(Authorization);
        }

        let freshness = if policy.shared {
            cc.freshness()
        } else {
            cc.max_age.map(Duration::from_secs)
        };
        Self::Storable { freshness }
    }

    pub fn is_storable(&self) -> bool {
        matches!(self, Self::Storable { .. })
    }
}

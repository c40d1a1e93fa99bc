//! Cache key derivation.
//!
//! A key is the SHA-256 digest of a canonical string built from the request:
//!
//! ```text
//! prefix | METHOD | /normalized/path | a=1&b=2 | accept=text/html&accept-language
//! ```
//!
//! Query pairs are sorted by name then value. Vary headers keep their declared
//! order; a header missing from the request is written without `=`, so it
//! never collides with a header sent with an empty value. `\`, `|`, `&` and
//! `=` inside any value are backslash-escaped.

use cachet_core::HttpRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The parts of a request that identify a cached variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Upper-cased method
    pub method: String,
    /// Normalized path
    pub path: String,
    /// Query pairs, repeated names included, sorted by name then value
    pub query: Vec<(String, String)>,
    /// Lower-cased header name with the request's value, if sent
    pub vary: Vec<(String, Option<String>)>,
}

impl RequestDescriptor {
    /// Describe a request, reading the given vary headers.
    pub fn from_request(request: &HttpRequest, vary_headers: &[String], lowercase_path: bool) -> Self {
        let mut query = request.query_params.clone();
        query.sort();

        let vary = vary_headers
            .iter()
            .map(|name| {
                (
                    name.to_ascii_lowercase(),
                    request.header(name).map(str::to_string),
                )
            })
            .collect();

        Self {
            method: request.method.to_ascii_uppercase(),
            path: normalize_path(&request.path, lowercase_path),
            query,
            vary,
        }
    }
}

/// Collapse repeated slashes and drop a trailing slash (except for `/`).
pub fn normalize_path(path: &str, lowercase: bool) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        normalized.push('/');
    }

    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        normalized.push(c);
    }

    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    if lowercase {
        normalized = normalized.to_lowercase();
    }
    normalized
}

/// Opaque storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        CacheKey(raw)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives cache keys under a prefix for a configured vary set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
    vary_headers: Vec<String>,
    normalize_path_case: bool,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            vary_headers: Vec::new(),
            normalize_path_case: false,
        }
    }

    /// Set the configured vary headers. Names are lower-cased; duplicates are
    /// dropped keeping the first occurrence.
    pub fn with_vary_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vary_headers.clear();
        for header in headers {
            push_unique(&mut self.vary_headers, header.as_ref());
        }
        self
    }

    /// Lower-case paths before keying.
    pub fn with_path_case_normalization(mut self, enabled: bool) -> Self {
        self.normalize_path_case = enabled;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn vary_headers(&self) -> &[String] {
        &self.vary_headers
    }

    /// The path as it enters the key.
    pub fn normalize(&self, path: &str) -> String {
        normalize_path(path, self.normalize_path_case)
    }

    /// Describe a request using the configured vary set plus `learned`
    /// headers (typically the stored response's own `Vary`).
    pub fn describe(&self, request: &HttpRequest, learned: &[String]) -> RequestDescriptor {
        let mut vary = self.vary_headers.clone();
        for header in learned {
            push_unique(&mut vary, header);
        }
        RequestDescriptor::from_request(request, &vary, self.normalize_path_case)
    }

    /// Build the key for a described request.
    pub fn build_key(&self, descriptor: &RequestDescriptor) -> CacheKey {
        self.finish(&[], &self.canonical_string(descriptor))
    }

    /// Key under which the `Vary` header names learned for a resource are
    /// kept. Independent of header values.
    pub fn vary_key(&self, descriptor: &RequestDescriptor) -> CacheKey {
        let resource = RequestDescriptor {
            vary: Vec::new(),
            ..descriptor.clone()
        };
        self.finish(&["vary"], &self.canonical_string(&resource))
    }

    /// The string that is hashed into the key.
    pub fn canonical_string(&self, descriptor: &RequestDescriptor) -> String {
        let query = descriptor
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join("&");

        let vary = descriptor
            .vary
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("{}={}", escape(name), escape(value)),
                None => escape(name),
            })
            .collect::<Vec<_>>()
            .join("&");

        [
            escape(&self.prefix),
            escape(&descriptor.method),
            escape(&descriptor.path),
            query,
            vary,
        ]
        .join("|")
    }

    fn finish(&self, namespace: &[&str], canonical: &str) -> CacheKey {
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));

        let mut parts: Vec<&str> = Vec::with_capacity(namespace.len() + 2);
        if !self.prefix.is_empty() {
            parts.push(&self.prefix);
        }
        parts.extend_from_slice(namespace);
        parts.push(&digest);
        CacheKey(parts.join(":"))
    }
}

fn push_unique(headers: &mut Vec<String>, header: &str) {
    let header = header.trim().to_ascii_lowercase();
    if !header.is_empty() && !headers.contains(&header) {
        headers.push(header);
    }
}

fn escape(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        if matches!(c, '\\' | '|' | '&' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

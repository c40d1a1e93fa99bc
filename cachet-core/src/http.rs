// HTTP request and response types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP request wrapper
///
/// Header names keep the casing the host supplied; use [`HttpRequest::header`]
/// for case-insensitive lookups.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Decoded query pairs in request order; repeated names are kept
    pub query_params: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: String, path: String) -> Self {
        Self {
            method,
            path,
            headers: HashMap::new(),
            body: Vec::new(),
            query_params: Vec::new(),
        }
    }

    /// Build a request from a method and a `path?query` target.
    ///
    /// ```
    /// use cachet_core::HttpRequest;
    ///
    /// let req = HttpRequest::from_target("GET", "/search?q=rust&page=2").unwrap();
    /// assert_eq!(req.path, "/search");
    /// assert_eq!(req.query("page").map(String::as_str), Some("2"));
    /// ```
    pub fn from_target(method: &str, target: &str) -> Result<Self, crate::Error> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        let mut request = Self::new(method.to_string(), path.to_string());
        request.query_params = serde_urlencoded::from_str(query)
            .map_err(|e| crate::Error::BadRequest(format!("invalid query string: {}", e)))?;
        Ok(request)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Get a header value, ignoring the case of the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    /// Get the first value of a query parameter
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// All values of a repeated query parameter, in request order
    pub fn query_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query_params
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Reassemble a response from stored parts.
    pub fn from_parts(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn created() -> Self {
        Self::new(201)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    /// Plain-text 200 response.
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        self.body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.set_header("Content-Type", "application/json");
        Ok(self)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.set_header(&key, value);
        self
    }

    /// Get a header value, ignoring the case of the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Insert a header, replacing any existing entry whose name differs only by case.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.insert(name.to_string(), value.into());
    }

    /// Remove every entry for `name`, ignoring case. Returns the last removed value.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let keys: Vec<String> = self
            .headers
            .keys()
            .filter(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .collect();

        let mut removed = None;
        for key in keys {
            removed = self.headers.remove(&key);
        }
        removed
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.get(name).map(String::as_str).or_else(|| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_target_splits_query() {
        let req = HttpRequest::from_target("GET", "/items?b=2&a=1").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/items");
        assert_eq!(req.query("a"), Some(&"1".to_string()));
        assert_eq!(req.query("b"), Some(&"2".to_string()));
    }

    #[test]
    fn test_from_target_decodes_percent_escapes() {
        let req = HttpRequest::from_target("GET", "/s?q=a%26b").unwrap();
        assert_eq!(req.query("q"), Some(&"a&b".to_string()));
    }

    #[test]
    fn test_from_target_keeps_repeated_names() {
        let req = HttpRequest::from_target("GET", "/search?tag=a&page=1&tag=b").unwrap();
        assert_eq!(req.query_params.len(), 3);
        assert_eq!(req.query("tag"), Some(&"a".to_string()));
        assert_eq!(req.query_all("tag").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_from_target_without_query() {
        let req = HttpRequest::from_target("HEAD", "/").unwrap();
        assert_eq!(req.path, "/");
        assert!(req.query_params.is_empty());
    }

    #[test]
    fn test_request_header_is_case_insensitive() {
        let req = HttpRequest::new("GET".to_string(), "/".to_string())
            .with_header("Accept-Encoding", "gzip");
        assert_eq!(req.header("accept-encoding"), Some("gzip"));
        assert_eq!(req.header("ACCEPT-ENCODING"), Some("gzip"));
        assert!(!req.has_header("cookie"));
    }

    #[test]
    fn test_set_header_replaces_other_casing() {
        let mut response = HttpResponse::ok().with_header("cache-control", "no-store");
        response.set_header("Cache-Control", "max-age=60");

        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.header("cache-control"), Some("max-age=60"));
    }

    #[test]
    fn test_remove_header() {
        let mut response = HttpResponse::ok().with_header("Vary", "Accept");
        assert_eq!(response.remove_header("vary"), Some("Accept".to_string()));
        assert!(response.header("Vary").is_none());
        assert_eq!(response.remove_header("vary"), None);
    }

    #[test]
    fn test_with_json_sets_content_type() {
        let response = HttpResponse::ok()
            .with_json(&serde_json::json!({"value": 1}))
            .unwrap();
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body, br#"{"value":1}"#.to_vec());
    }

    #[test]
    fn test_text_response() {
        let response = HttpResponse::text("Hello, world!");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"Hello, world!".to_vec());
    }
}

//! Error types for the caching policy.

use thiserror::Error;

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors raised while configuring or applying the caching policy.
///
/// Only [`PolicyError::Configuration`] is ever fatal, and only at startup. The
/// other kinds are recovered inside the middleware: the request is served
/// without caching.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Invalid pattern, status code, or irreconcilable static directives
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A store operation failed or timed out
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An unparseable `Cache-Control` token
    #[error("Malformed Cache-Control directive: {0}")]
    MalformedDirective(String),

    /// A cache entry could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PolicyError {
    /// Whether the error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PolicyError::Configuration(_))
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::Serialization(err.to_string())
    }
}

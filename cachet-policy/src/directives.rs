//! `Cache-Control` directives.
//!
//! [`Directives`] is the typed form of a `Cache-Control` header. Parsing is
//! lenient: an unparseable token is reported and skipped, and the rest of the
//! header is still read.
//!
//! # Examples
//!
//! ```
//! use cachet_policy::directives::{Directives, Visibility};
//! use std::time::Duration;
//!
//! let cc = Directives::new()
//!     .public()
//!     .max_age(Duration::from_secs(3600))
//!     .must_revalidate();
//!
//! assert_eq!(cc.to_header_value(), "public, max-age=3600, must-revalidate");
//!
//! let parsed = Directives::parse("Public, MAX-AGE=\"3600\",must-revalidate");
//! assert_eq!(parsed, cc);
//! assert_eq!(parsed.visibility, Visibility::Public);
//! ```

use crate::error::{PolicyError, PolicyResult};
use cachet_core::{HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Largest delta-seconds value kept; bigger values are clamped (RFC 7234 §1.2.1).
pub const MAX_DELTA_SECONDS: u64 = 2_147_483_648;

/// Who may store a response.
///
/// `public` and `private` only exist as two tokens on the wire; internally
/// they are one field, so setting one always clears the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    #[default]
    Unspecified,
    Public,
    Private,
}

impl Visibility {
    /// The wire token, if any.
    pub fn as_token(&self) -> Option<&'static str> {
        match self {
            Visibility::Unspecified => None,
            Visibility::Public => Some("public"),
            Visibility::Private => Some("private"),
        }
    }
}

/// Parsed or constructed `Cache-Control` directive set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub visibility: Visibility,
    pub no_store: bool,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub no_transform: bool,
    pub immutable: bool,
    pub must_understand: bool,
    pub only_if_cached: bool,
    /// `max-age`, in seconds
    pub max_age: Option<u64>,
    /// `s-maxage`, in seconds
    pub s_maxage: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
    pub stale_if_error: Option<u64>,
    pub min_fresh: Option<u64>,
    /// `max-stale`; `Some(None)` is the valueless form
    pub max_stale: Option<Option<u64>>,
    /// Unknown directives, kept verbatim in the order seen
    pub extensions: Vec<(String, Option<String>)>,
}

impl Directives {
    /// Create an empty directive set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Cache-Control` header value, logging and skipping bad tokens.
    pub fn parse(header: &str) -> Self {
        let (directives, errors) = Self::parse_with_errors(header);
        for err in errors {
            warn!(header = %header, error = %err, "Ignoring Cache-Control token");
        }
        directives
    }

    /// Parse a `Cache-Control` header value, returning the skipped tokens.
    ///
    /// Names are case-insensitive and values may be quoted. When a directive
    /// repeats, the first occurrence wins; when both `public` and `private`
    /// appear, `private` wins.
    pub fn parse_with_errors(header: &str) -> (Self, Vec<PolicyError>) {
        let mut directives = Self::default();
        let mut errors = Vec::new();

        for token in split_tokens(header) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Err(err) = directives.apply_token(token) {
                errors.push(err);
            }
        }

        (directives, errors)
    }

    /// Parse the `Cache-Control` header of a response, if it has one.
    pub fn from_response(response: &HttpResponse) -> Self {
        response
            .header("Cache-Control")
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// Parse the `Cache-Control` header of a request, if it has one.
    pub fn from_request(request: &HttpRequest) -> Self {
        request
            .header("Cache-Control")
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// Build a directive set from `name -> value` pairs, as found in
    /// configuration files.
    ///
    /// Underscores in names are read as hyphens. Flags take booleans; valued
    /// directives take seconds. Setting both `public` and `private` is an error.
    pub fn from_mapping<I, K>(entries: I) -> PolicyResult<Self>
    where
        I: IntoIterator<Item = (K, DirectiveValue)>,
        K: AsRef<str>,
    {
        let mut directives = Self::default();
        let mut public = false;
        let mut private = false;

        for (name, value) in entries {
            let name = name.as_ref().trim().to_ascii_lowercase().replace('_', "-");
            let bad = |expected: &str| {
                PolicyError::Configuration(format!(
                    "directive `{}` expects {}, got {}",
                    name, expected, value
                ))
            };

            match name.as_str() {
                "public" => public = value.as_flag().ok_or_else(|| bad("a boolean"))?,
                "private" => private = value.as_flag().ok_or_else(|| bad("a boolean"))?,
                "max-stale" => {
                    directives.max_stale = match &value {
                        DirectiveValue::Flag(true) => Some(None),
                        DirectiveValue::Flag(false) => None,
                        other => Some(Some(other.as_seconds().ok_or_else(|| bad("seconds"))?)),
                    }
                }
                _ => match directives.flag_mut(&name) {
                    Some(flag) => *flag = value.as_flag().ok_or_else(|| bad("a boolean"))?,
                    None => match directives.seconds_mut(&name) {
                        Some(slot) => {
                            *slot = Some(value.as_seconds().ok_or_else(|| bad("seconds"))?)
                        }
                        None => {
                            if !is_token(&name) {
                                return Err(PolicyError::Configuration(format!(
                                    "invalid directive name {:?}",
                                    name
                                )));
                            }
                            match value {
                                DirectiveValue::Flag(false) => {}
                                DirectiveValue::Flag(true) => directives.extensions.push((name, None)),
                                other => directives.extensions.push((name, Some(other.to_string()))),
                            }
                        }
                    },
                },
            }
        }

        directives.visibility = match (public, private) {
            (true, true) => {
                return Err(PolicyError::Configuration(
                    "`public` and `private` cannot both be set".to_string(),
                ));
            }
            (true, false) => Visibility::Public,
            (false, true) => Visibility::Private,
            (false, false) => Visibility::Unspecified,
        };

        Ok(directives)
    }

    fn apply_token(&mut self, token: &str) -> PolicyResult<()> {
        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (token, None),
        };

        if !is_token(name) {
            return Err(PolicyError::MalformedDirective(format!(
                "invalid directive name in {:?}",
                token
            )));
        }
        let name = name.to_ascii_lowercase();

        let value = match value {
            Some(raw) => Some(unquote(raw).ok_or_else(|| {
                PolicyError::MalformedDirective(format!("unterminated quoted value in {:?}", token))
            })?),
            None => None,
        };

        match name.as_str() {
            "public" => {
                if self.visibility == Visibility::Unspecified {
                    self.visibility = Visibility::Public;
                }
                return Ok(());
            }
            "private" => {
                self.visibility = Visibility::Private;
                return Ok(());
            }
            "max-stale" => {
                if self.max_stale.is_none() {
                    self.max_stale = Some(match value {
                        Some(v) => Some(parse_delta_seconds(&name, &v)?),
                        None => None,
                    });
                }
                return Ok(());
            }
            _ => {}
        }

        // Flags carrying an argument (`no-cache="Set-Cookie"`) still count as set.
        if let Some(flag) = self.flag_mut(&name) {
            *flag = true;
            return Ok(());
        }

        if let Some(slot) = self.seconds_mut(&name) {
            let v = value.ok_or_else(|| {
                PolicyError::MalformedDirective(format!("`{}` requires a value", name))
            })?;
            let secs = parse_delta_seconds(&name, &v)?;
            if slot.is_none() {
                *slot = Some(secs);
            }
            return Ok(());
        }

        let raw_value = token
            .split_once('=')
            .map(|(_, raw)| raw.trim().to_string());
        if !self.extensions.iter().any(|(existing, _)| *existing == name) {
            self.extensions.push((name, raw_value));
        }
        Ok(())
    }

    fn flag_mut(&mut self, name: &str) -> Option<&mut bool> {
        match name {
            "no-store" => Some(&mut self.no_store),
            "no-cache" => Some(&mut self.no_cache),
            "must-revalidate" => Some(&mut self.must_revalidate),
            "proxy-revalidate" => Some(&mut self.proxy_revalidate),
            "no-transform" => Some(&mut self.no_transform),
            "immutable" => Some(&mut self.immutable),
            "must-understand" => Some(&mut self.must_understand),
            "only-if-cached" => Some(&mut self.only_if_cached),
            _ => None,
        }
    }

    fn seconds_mut(&mut self, name: &str) -> Option<&mut Option<u64>> {
        match name {
            "max-age" => Some(&mut self.max_age),
            "s-maxage" => Some(&mut self.s_maxage),
            "stale-while-revalidate" => Some(&mut self.stale_while_revalidate),
            "stale-if-error" => Some(&mut self.stale_if_error),
            "min-fresh" => Some(&mut self.min_fresh),
            _ => None,
        }
    }

    /// Serialize to a header value. Unset directives are omitted.
    pub fn to_header_value(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(token) = self.visibility.as_token() {
            parts.push(token.to_string());
        }
        if self.no_store {
            parts.push("no-store".to_string());
        }
        if self.no_cache {
            parts.push("no-cache".to_string());
        }
        if let Some(secs) = self.max_age {
            parts.push(format!("max-age={}", secs));
        }
        if let Some(secs) = self.s_maxage {
            parts.push(format!("s-maxage={}", secs));
        }

        let flags = [
            (self.must_revalidate, "must-revalidate"),
            (self.proxy_revalidate, "proxy-revalidate"),
            (self.no_transform, "no-transform"),
            (self.immutable, "immutable"),
            (self.must_understand, "must-understand"),
        ];
        parts.extend(flags.iter().filter(|(set, _)| *set).map(|(_, name)| name.to_string()));

        if let Some(secs) = self.stale_while_revalidate {
            parts.push(format!("stale-while-revalidate={}", secs));
        }
        if let Some(secs) = self.stale_if_error {
            parts.push(format!("stale-if-error={}", secs));
        }
        match self.max_stale {
            Some(Some(secs)) => parts.push(format!("max-stale={}", secs)),
            Some(None) => parts.push("max-stale".to_string()),
            None => {}
        }
        if let Some(secs) = self.min_fresh {
            parts.push(format!("min-fresh={}", secs));
        }
        if self.only_if_cached {
            parts.push("only-if-cached".to_string());
        }
        for (name, value) in &self.extensions {
            match value {
                Some(value) => parts.push(format!("{}={}", name, value)),
                None => parts.push(name.clone()),
            }
        }

        parts.join(", ")
    }

    /// Whether no directive is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Freshness lifetime for a shared cache: `s-maxage`, else `max-age`.
    pub fn freshness(&self) -> Option<Duration> {
        self.s_maxage.or(self.max_age).map(Duration::from_secs)
    }

    /// Look up an extension directive.
    pub fn extension(&self, name: &str) -> Option<Option<&str>> {
        self.extensions
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_deref())
    }

    // ==================== Builder Methods ====================

    /// Set `public`, clearing `private`.
    pub fn public(mut self) -> Self {
        self.visibility = Visibility::Public;
        self
    }

    /// Set `private`, clearing `public`.
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn max_age(mut self, duration: Duration) -> Self {
        self.max_age = Some(duration.as_secs());
        self
    }

    pub fn s_maxage(mut self, duration: Duration) -> Self {
        self.s_maxage = Some(duration.as_secs());
        self
    }

    pub fn must_revalidate(mut self) -> Self {
        self.must_revalidate = true;
        self
    }

    pub fn proxy_revalidate(mut self) -> Self {
        self.proxy_revalidate = true;
        self
    }

    pub fn no_transform(mut self) -> Self {
        self.no_transform = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn stale_while_revalidate(mut self, duration: Duration) -> Self {
        self.stale_while_revalidate = Some(duration.as_secs());
        self
    }

    pub fn stale_if_error(mut self, duration: Duration) -> Self {
        self.stale_if_error = Some(duration.as_secs());
        self
    }

    /// Add an extension directive, replacing one of the same name.
    pub fn extension_directive(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        let name = name.into().to_ascii_lowercase();
        self.extensions.retain(|(existing, _)| *existing != name);
        self.extensions.push((name, value));
        self
    }
}

impl fmt::Display for Directives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header_value())
    }
}

impl std::str::FromStr for Directives {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// A directive value in a configuration mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirectiveValue {
    Flag(bool),
    Seconds(u64),
    Text(String),
}

impl DirectiveValue {
    fn as_flag(&self) -> Option<bool> {
        match self {
            DirectiveValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    fn as_seconds(&self) -> Option<u64> {
        match self {
            DirectiveValue::Seconds(secs) => Some((*secs).min(MAX_DELTA_SECONDS)),
            DirectiveValue::Text(text) => text.trim().parse::<u64>().ok().map(|s| s.min(MAX_DELTA_SECONDS)),
            DirectiveValue::Flag(_) => None,
        }
    }
}

impl fmt::Display for DirectiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveValue::Flag(flag) => write!(f, "{}", flag),
            DirectiveValue::Seconds(secs) => write!(f, "{}", secs),
            DirectiveValue::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Split on commas that are not inside a quoted string.
fn split_tokens(header: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in header.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                tokens.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    tokens.push(&header[start..]);
    tokens
}

/// Strip surrounding quotes and resolve `\` escapes. `None` if unterminated.
fn unquote(raw: &str) -> Option<String> {
    let Some(inner) = raw.strip_prefix('"') else {
        return Some(raw.to_string());
    };
    let inner = inner.strip_suffix('"')?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next()?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn parse_delta_seconds(name: &str, value: &str) -> PolicyResult<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PolicyError::MalformedDirective(format!(
            "`{}` expects delta-seconds, got {:?}",
            name, value
        )));
    }
    // All digits: the only failure left is overflow.
    Ok(value.parse::<u64>().map_or(MAX_DELTA_SECONDS, |v| v.min(MAX_DELTA_SECONDS)))
}

/// RFC 7230 token characters.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

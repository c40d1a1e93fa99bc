//! Path rules deciding whether caching applies to a request at all.

use crate::error::{PolicyError, PolicyResult};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// A compiled path pattern.
///
/// Supported forms:
///
/// - `/about` matches exactly `/about`
/// - `/users/*/profile`: an inner `*` matches within one path segment
/// - `/static/*`: a trailing `*` matches any remainder, across segments
/// - `/docs/**/index.html`: `**` matches across segments
/// - `*` matches every path
/// - `re:^/v[0-9]+/` is a regular expression, anchored to the whole path
///
/// Matching is case-sensitive.
///
/// ```
/// use cachet_policy::rules::PathPattern;
///
/// let pattern: PathPattern = "/users/*/profile".parse().unwrap();
/// assert!(pattern.matches("/users/42/profile"));
/// assert!(!pattern.matches("/users/42/x/profile"));
/// ```
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Any,
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl PathPattern {
    /// Compile a pattern.
    pub fn parse(pattern: &str) -> PolicyResult<Self> {
        let invalid = |reason: &str| {
            PolicyError::Configuration(format!("invalid path pattern {:?}: {}", pattern, reason))
        };

        if pattern.is_empty() {
            return Err(invalid("empty pattern"));
        }

        let matcher = if let Some(expr) = pattern.strip_prefix("re:") {
            let anchored = format!("^(?:{})$", expr);
            Matcher::Regex(Regex::new(&anchored).map_err(|e| invalid(&e.to_string()))?)
        } else if pattern == "*" {
            Matcher::Any
        } else {
            if !pattern.starts_with('/') {
                return Err(invalid("must start with `/`"));
            }
            if pattern.contains("***") {
                return Err(invalid("`***` is not a wildcard"));
            }
            compile_glob(pattern).map_err(|e| invalid(&e.to_string()))?
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// Whether the whole path matches.
    pub fn matches(&self, path: &str) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Exact(exact) => path == exact,
            Matcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Matcher::Regex(re) => re.is_match(path),
        }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn compile_glob(pattern: &str) -> Result<Matcher, regex::Error> {
    let star_count = pattern.matches('*').count();

    if star_count == 0 {
        return Ok(Matcher::Exact(pattern.to_string()));
    }
    if star_count == 1 && pattern.ends_with('*') {
        return Ok(Matcher::Prefix(pattern[..pattern.len() - 1].to_string()));
    }

    let mut expr = String::from("^");
    let mut rest = pattern;
    while let Some(idx) = rest.find('*') {
        expr.push_str(&regex::escape(&rest[..idx]));
        rest = &rest[idx..];

        if rest.starts_with("**") || rest.len() == 1 {
            expr.push_str(".*");
            rest = &rest[if rest.starts_with("**") { 2 } else { 1 }..];
        } else {
            expr.push_str("[^/]*");
            rest = &rest[1..];
        }
    }
    expr.push_str(&regex::escape(rest));
    expr.push('$');

    Ok(Matcher::Regex(Regex::new(&expr)?))
}

impl FromStr for PathPattern {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathPattern {}

/// Inclusion and exclusion pattern lists.
///
/// A path is considered when it matches at least one match pattern (an empty
/// list matches everything) and no deny pattern. Deny always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheRule {
    pub match_patterns: Vec<PathPattern>,
    pub deny_patterns: Vec<PathPattern>,
}

impl CacheRule {
    /// Rule considering every path.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn new(match_patterns: Vec<PathPattern>, deny_patterns: Vec<PathPattern>) -> Self {
        Self {
            match_patterns,
            deny_patterns,
        }
    }

    /// Compile both lists from pattern strings.
    pub fn from_patterns<M, D>(match_patterns: M, deny_patterns: D) -> PolicyResult<Self>
    where
        M: IntoIterator,
        M::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Ok(Self {
            match_patterns: match_patterns
                .into_iter()
                .map(|p| PathPattern::parse(p.as_ref()))
                .collect::<PolicyResult<_>>()?,
            deny_patterns: deny_patterns
                .into_iter()
                .map(|p| PathPattern::parse(p.as_ref()))
                .collect::<PolicyResult<_>>()?,
        })
    }

    /// Whether caching logic applies to `path`.
    pub fn should_consider(&self, path: &str) -> bool {
        if let Some(deny) = self.deny_patterns.iter().find(|p| p.matches(path)) {
            trace!(path = %path, pattern = %deny, "Path denied");
            return false;
        }

        let considered =
            self.match_patterns.is_empty() || self.match_patterns.iter().any(|p| p.matches(path));
        trace!(path = %path, considered, "Path rule evaluated");
        considered
    }
}

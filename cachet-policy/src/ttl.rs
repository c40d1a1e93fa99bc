//! Time-to-live values and their resolution.

use crate::directives::Directives;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// How long a stored entry stays valid.
///
/// "No TTL configured" is always `Option<Ttl>::None`; [`Ttl::Forever`] is an
/// explicit request to cache without expiry and is never used to mean unset.
///
/// In configuration files a TTL is written as a number of seconds or as the
/// string `"forever"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// Expire after the duration
    After(Duration),
    /// Never expire
    Forever,
}

impl Ttl {
    /// TTL of whole seconds.
    pub const fn seconds(secs: u64) -> Self {
        Ttl::After(Duration::from_secs(secs))
    }

    /// A zero TTL means "do not cache".
    pub fn is_zero(&self) -> bool {
        matches!(self, Ttl::After(d) if d.is_zero())
    }

    pub fn is_forever(&self) -> bool {
        matches!(self, Ttl::Forever)
    }

    /// The finite duration, or `None` for [`Ttl::Forever`].
    ///
    /// This is exactly the expiry handed to the store backend.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Ttl::After(d) => Some(*d),
            Ttl::Forever => None,
        }
    }

    /// Whole seconds to advertise in `max-age` and `Expires`, rounded up so
    /// a sub-second TTL never reads as `max-age=0`. `None` for
    /// [`Ttl::Forever`].
    pub fn advertised_secs(&self) -> Option<u64> {
        self.as_duration()
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::After(d)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::After(d) if d.subsec_nanos() == 0 => write!(f, "{}s", d.as_secs()),
            Ttl::After(d) => write!(f, "{}s", d.as_secs_f64()),
            Ttl::Forever => write!(f, "forever"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TtlRepr {
    Seconds(u64),
    Fractional(f64),
    Word(String),
}

impl Serialize for Ttl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self {
            Ttl::After(d) if d.subsec_nanos() == 0 => TtlRepr::Seconds(d.as_secs()),
            Ttl::After(d) => TtlRepr::Fractional(d.as_secs_f64()),
            Ttl::Forever => TtlRepr::Word("forever".to_string()),
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ttl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match TtlRepr::deserialize(deserializer)? {
            TtlRepr::Seconds(secs) => Ok(Ttl::seconds(secs)),
            TtlRepr::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map(Ttl::After)
                .map_err(|_| D::Error::custom(format!("invalid ttl: {}", secs))),
            TtlRepr::Word(word) if word.eq_ignore_ascii_case("forever") => Ok(Ttl::Forever),
            TtlRepr::Word(word) => Err(D::Error::custom(format!(
                "invalid ttl {:?}: expected seconds or \"forever\"",
                word
            ))),
        }
    }
}

/// Resolve the effective TTL for a response.
///
/// Priority, highest first: the response's `s-maxage`, its `max-age`, the
/// route's TTL (which may be [`Ttl::Forever`]), then `default`. A zero result
/// means the response must not be stored.
pub fn resolve_ttl(response: &Directives, route: Option<Ttl>, default: Ttl) -> Ttl {
    if let Some(secs) = response.s_maxage.or(response.max_age) {
        return Ttl::seconds(secs);
    }
    route.unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_max_age_beats_route() {
        let directives = Directives::parse("max-age=120");
        let ttl = resolve_ttl(&directives, Some(Ttl::seconds(60)), Ttl::seconds(300));
        assert_eq!(ttl, Ttl::seconds(120));
    }

    #[test]
    fn test_s_maxage_beats_max_age() {
        let directives = Directives::parse("max-age=120, s-maxage=30");
        assert_eq!(
            resolve_ttl(&directives, None, Ttl::seconds(300)),
            Ttl::seconds(30)
        );
    }

    #[test]
    fn test_route_beats_default() {
        let directives = Directives::default();
        assert_eq!(
            resolve_ttl(&directives, Some(Ttl::Forever), Ttl::seconds(300)),
            Ttl::Forever
        );
        assert_eq!(
            resolve_ttl(&directives, None, Ttl::seconds(300)),
            Ttl::seconds(300)
        );
    }

    #[test]
    fn test_zero_max_age_resolves_to_zero() {
        let directives = Directives::parse("max-age=0");
        let ttl = resolve_ttl(&directives, Some(Ttl::Forever), Ttl::seconds(300));
        assert!(ttl.is_zero());
    }

    #[test]
    fn test_advertised_secs_round_up() {
        assert_eq!(Ttl::After(Duration::from_millis(500)).advertised_secs(), Some(1));
        assert_eq!(Ttl::After(Duration::from_millis(1500)).advertised_secs(), Some(2));
        assert_eq!(Ttl::seconds(30).advertised_secs(), Some(30));
        assert_eq!(Ttl::Forever.advertised_secs(), None);
    }

    #[test]
    fn test_forever_is_not_zero_and_has_no_duration() {
        assert!(!Ttl::Forever.is_zero());
        assert_eq!(Ttl::Forever.as_duration(), None);
        assert_eq!(Ttl::seconds(5).as_duration(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_serde_forms() {
        let ttl: Ttl = serde_json::from_str("60").unwrap();
        assert_eq!(ttl, Ttl::seconds(60));

        let ttl: Ttl = serde_json::from_str("\"forever\"").unwrap();
        assert_eq!(ttl, Ttl::Forever);

        let ttl: Ttl = serde_json::from_str("1.5").unwrap();
        assert_eq!(ttl, Ttl::After(Duration::from_millis(1500)));

        assert!(serde_json::from_str::<Ttl>("\"soon\"").is_err());
        assert!(serde_json::from_str::<Ttl>("-3.0").is_err());

        assert_eq!(serde_json::to_string(&Ttl::seconds(10)).unwrap(), "10");
        assert_eq!(serde_json::to_string(&Ttl::Forever).unwrap(), "\"forever\"");
    }

    #[test]
    fn test_display() {
        assert_eq!(Ttl::seconds(30).to_string(), "30s");
        assert_eq!(Ttl::Forever.to_string(), "forever");
    }
}

//! Combining configured directives with the ones a handler emitted.

use crate::directives::{Directives, Visibility};
use cachet_core::HttpResponse;
use tracing::trace;

/// Overlay `static_directives` onto `response` directives.
///
/// Static values win per directive name. Flags are OR-ed in, so a static set
/// can add `no-store` but never remove one the handler chose. A static
/// visibility replaces the response's, which keeps `public` and `private`
/// exclusive.
///
/// ```
/// use cachet_policy::directives::Directives;
/// use cachet_policy::merge::merge;
///
/// let merged = merge(&Directives::parse("private"), &Directives::parse("public"));
/// assert_eq!(merged.to_header_value(), "private");
/// ```
pub fn merge(static_directives: &Directives, response: &Directives) -> Directives {
    let mut merged = response.clone();

    if static_directives.visibility != Visibility::Unspecified {
        merged.visibility = static_directives.visibility;
    }

    merged.no_store |= static_directives.no_store;
    merged.no_cache |= static_directives.no_cache;
    merged.must_revalidate |= static_directives.must_revalidate;
    merged.proxy_revalidate |= static_directives.proxy_revalidate;
    merged.no_transform |= static_directives.no_transform;
    merged.immutable |= static_directives.immutable;
    merged.must_understand |= static_directives.must_understand;
    merged.only_if_cached |= static_directives.only_if_cached;

    let overlay = |ours: Option<u64>, theirs: Option<u64>| ours.or(theirs);
    merged.max_age = overlay(static_directives.max_age, response.max_age);
    merged.s_maxage = overlay(static_directives.s_maxage, response.s_maxage);
    merged.stale_while_revalidate = overlay(
        static_directives.stale_while_revalidate,
        response.stale_while_revalidate,
    );
    merged.stale_if_error = overlay(static_directives.stale_if_error, response.stale_if_error);
    merged.min_fresh = overlay(static_directives.min_fresh, response.min_fresh);
    merged.max_stale = static_directives.max_stale.or(response.max_stale);

    for (name, value) in &static_directives.extensions {
        merged.extensions.retain(|(existing, _)| existing != name);
        merged.extensions.push((name.clone(), value.clone()));
    }

    merged
}

/// Write `directives` onto the response's `Cache-Control` header, removing
/// the header when nothing is set.
pub fn apply_directives(response: &mut HttpResponse, directives: &Directives) {
    if directives.is_empty() {
        response.remove_header("Cache-Control");
    } else {
        response.set_header("Cache-Control", directives.to_header_value());
    }
}

/// Merge `static_directives` into the response's current `Cache-Control`
/// header and write the result back. Returns the merged set.
pub fn patch_cache_control(response: &mut HttpResponse, static_directives: &Directives) -> Directives {
    let current = Directives::from_response(response);
    let merged = merge(static_directives, &current);
    trace!(before = %current, after = %merged, "Patched Cache-Control");
    apply_directives(response, &merged);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_static_private_replaces_public() {
        let merged = merge(&Directives::new().private(), &Directives::new().public());
        assert_eq!(merged, Directives::new().private());
    }

    #[test]
    fn test_static_public_replaces_private() {
        let merged = merge(
            &Directives::new().public(),
            &Directives::parse("private, max-age=10"),
        );
        assert_eq!(merged.to_header_value(), "public, max-age=10");
    }

    #[test]
    fn test_unspecified_static_visibility_keeps_response() {
        let merged = merge(&Directives::parse("no-transform"), &Directives::parse("private"));
        assert_eq!(merged.visibility, Visibility::Private);
        assert!(merged.no_transform);
    }

    #[test]
    fn test_static_values_win() {
        let merged = merge(
            &Directives::new().max_age(Duration::from_secs(60)),
            &Directives::parse("max-age=120, s-maxage=30"),
        );
        assert_eq!(merged.max_age, Some(60));
        assert_eq!(merged.s_maxage, Some(30));
    }

    #[test]
    fn test_flags_are_combined() {
        let merged = merge(&Directives::parse("immutable"), &Directives::parse("no-store"));
        assert!(merged.immutable);
        assert!(merged.no_store);
    }

    #[test]
    fn test_extensions_replaced_by_name() {
        let merged = merge(
            &Directives::parse("community=new"),
            &Directives::parse("community=old, other"),
        );
        assert_eq!(merged.extension("community"), Some(Some("new")));
        assert_eq!(merged.extension("other"), Some(None));
    }

    #[test]
    fn test_empty_static_set_is_identity() {
        let response = Directives::parse("public, max-age=5, foo=bar");
        assert_eq!(merge(&Directives::new(), &response), response);
    }

    #[test]
    fn test_patch_cache_control_rewrites_header() {
        let mut response = HttpResponse::ok().with_header("cache-control", "PUBLIC,max-age=5");
        patch_cache_control(&mut response, &Directives::new().private().no_transform());

        assert_eq!(
            response.header("Cache-Control"),
            Some("private, max-age=5, no-transform")
        );
        assert_eq!(response.headers.len(), 1);
    }

    #[test]
    fn test_apply_empty_removes_header() {
        let mut response = HttpResponse::ok().with_header("Cache-Control", "garbage=\"");
        apply_directives(&mut response, &Directives::new());
        assert!(response.header("Cache-Control").is_none());
    }
}

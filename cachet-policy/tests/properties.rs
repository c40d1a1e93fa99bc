//! Property-based tests for keys, path rules and directives

use cachet_core::{HttpRequest, HttpResponse};
use cachet_policy::directives::MAX_DELTA_SECONDS;
use cachet_policy::*;
use proptest::prelude::*;

fn request(path: &str, query: &[(String, String)]) -> HttpRequest {
    let mut req = HttpRequest::new("GET".to_string(), path.to_string());
    req.query_params = query.to_vec();
    req
}

fn seconds() -> impl Strategy<Value = Option<u64>> {
    prop::option::of(0..=MAX_DELTA_SECONDS)
}

prop_compose! {
    fn directives()(
        visibility in prop::sample::select(vec![
            Visibility::Unspecified,
            Visibility::Public,
            Visibility::Private,
        ]),
        flags in prop::array::uniform8(any::<bool>()),
        max_age in seconds(),
        s_maxage in seconds(),
        stale_while_revalidate in seconds(),
        stale_if_error in seconds(),
        min_fresh in seconds(),
        max_stale in prop::option::of(seconds()),
    ) -> Directives {
        Directives {
            visibility,
            no_store: flags[0],
            no_cache: flags[1],
            must_revalidate: flags[2],
            proxy_revalidate: flags[3],
            no_transform: flags[4],
            immutable: flags[5],
            must_understand: flags[6],
            only_if_cached: flags[7],
            max_age,
            s_maxage,
            stale_while_revalidate,
            stale_if_error,
            min_fresh,
            max_stale,
            extensions: Vec::new(),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_deny_always_wins(segments in prop::collection::vec("[a-z0-9]{1,8}", 1..5)) {
        let path = format!("/{}", segments.join("/"));
        let rule = CacheRule::from_patterns(["/**"], [path.as_str()]).unwrap();
        prop_assert!(!rule.should_consider(&path));
    }

    #[test]
    fn test_identical_requests_share_a_key(
        path in "/[a-z/]{0,20}",
        query in prop::collection::vec(("[a-z]{1,5}", "[a-z0-9&=|]{0,5}"), 0..5),
    ) {
        let keys = KeyBuilder::new("p").with_vary_headers(["accept"]);
        let a = keys.build_key(&keys.describe(&request(&path, &query), &[]));
        let b = keys.build_key(&keys.describe(&request(&path, &query), &[]));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_query_order_is_irrelevant(
        forward in prop::collection::vec(("[a-c]{1,2}", "[a-z0-9]{0,3}"), 0..8),
    ) {
        let mut reversed = forward.clone();
        reversed.reverse();

        let keys = KeyBuilder::new("p");
        let a = keys.build_key(&keys.describe(&request("/q", &forward), &[]));
        let b = keys.build_key(&keys.describe(&request("/q", &reversed), &[]));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_every_repeated_value_counts(
        name in "[a-z]{1,4}",
        values in prop::collection::vec("[a-z0-9]{0,4}", 2..6),
        dropped in any::<prop::sample::Index>(),
    ) {
        let all: Vec<(String, String)> = values.iter().map(|v| (name.clone(), v.clone())).collect();
        let mut fewer = all.clone();
        fewer.remove(dropped.index(fewer.len()));

        let keys = KeyBuilder::new("p");
        let full = keys.build_key(&keys.describe(&request("/r", &all), &[]));
        let reduced = keys.build_key(&keys.describe(&request("/r", &fewer), &[]));
        prop_assert_ne!(full.clone(), reduced);

        let mut shuffled = all.clone();
        shuffled.reverse();
        prop_assert_eq!(full, keys.build_key(&keys.describe(&request("/r", &shuffled), &[])));
    }

    #[test]
    fn test_vary_values_separate_keys(a in "[ -~]{0,12}", b in "[ -~]{0,12}") {
        prop_assume!(a != b);
        let keys = KeyBuilder::new("p").with_vary_headers(["Accept-Language"]);
        let first = request("/v", &[]).with_header("Accept-Language", a);
        let second = request("/v", &[]).with_header("Accept-Language", b);
        prop_assert_ne!(
            keys.build_key(&keys.describe(&first, &[])),
            keys.build_key(&keys.describe(&second, &[]))
        );
    }

    #[test]
    fn test_directives_survive_serialization(directives in directives()) {
        let header = directives.to_header_value();
        prop_assert_eq!(Directives::parse(&header), directives);
    }

    #[test]
    fn test_parse_never_panics(header in "[ -~]{0,60}") {
        let (_, errors) = Directives::parse_with_errors(&header);
        prop_assert!(errors.len() <= header.split(',').count());
    }

    #[test]
    fn test_server_errors_are_never_storable(
        status in 500u16..600,
        cache_control in "(public|max-age=60|s-maxage=10|immutable)?",
    ) {
        let policy = CachePolicy::default();
        prop_assume!(!policy.cacheable_status_codes.contains(&status));

        let response = HttpResponse::new(status).with_header("Cache-Control", cache_control);
        let verdict = ResponseCacheability::evaluate(&request("/", &[]), &response, &policy);
        prop_assert_eq!(verdict, ResponseCacheability::NotStorable(NotStorableReason::Status(status)));
    }
}

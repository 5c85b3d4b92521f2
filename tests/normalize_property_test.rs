//! Property tests for URL normalization
//!
//! Normalization is the identity under which the dedup index and the
//! ledger key their maps, so idempotence is load-bearing: a key must not
//! change when normalized again.

use fleetscrape::normalize_url;
use proptest::prelude::*;

/// URLs as they actually arrive from discovery: optional scheme, optional
/// `www.`, host, path, optional trailing slash, optional query/fragment,
/// in mixed case.
fn url_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just(""), Just("http://"), Just("https://"), Just("HTTPS://")],
        prop_oneof![Just(""), Just("www."), Just("WWW.")],
        "[a-zA-Z][a-zA-Z0-9]{1,12}\\.(com|org|net)",
        "(/[a-zA-Z0-9._-]{1,10}){0,4}",
        prop_oneof![Just(""), Just("/")],
        prop_oneof![Just(String::new()), "\\?[a-z0-9=&_]{1,20}"],
        prop_oneof![Just(String::new()), "#[a-z0-9-]{1,10}"],
    )
        .prop_map(|(scheme, www, host, path, slash, query, fragment)| {
            format!("{scheme}{www}{host}{path}{slash}{query}{fragment}")
        })
}

proptest! {
    #[test]
    fn normalize_is_idempotent(url in url_strategy()) {
        let once = normalize_url(&url);
        prop_assert_eq!(normalize_url(&once), once);
    }

    #[test]
    fn normalize_collapses_scheme_and_www(
        host in "[a-z][a-z0-9]{1,10}\\.(com|org|net)",
        path in "(/[a-z0-9]{1,8}){0,3}",
    ) {
        let https = format!("https://www.{host}{path}");
        let http = format!("http://{host}{path}");
        prop_assert_eq!(normalize_url(&https), normalize_url(&http));
    }

    #[test]
    fn normalize_ignores_query_and_fragment(
        host in "[a-z][a-z0-9]{1,10}\\.com",
        path in "(/[a-z0-9]{1,8}){0,3}",
        query in "[a-z0-9=&]{1,20}",
        fragment in "[a-z0-9]{1,10}",
    ) {
        let plain = format!("https://{host}{path}");
        let noisy = format!("https://{host}{path}?{query}#{fragment}");
        prop_assert_eq!(normalize_url(&plain), normalize_url(&noisy));
    }

    #[test]
    fn normalized_keys_never_carry_stripped_parts(url in url_strategy()) {
        let key = normalize_url(&url);
        prop_assert!(!key.contains("://"));
        prop_assert!(!key.starts_with("www."));
        prop_assert!(!key.contains('?'));
        prop_assert!(!key.contains('#'));
        prop_assert!(!key.ends_with('/'));
    }
}

#[test]
fn test_known_equivalence_class() {
    assert_eq!(
        normalize_url("https://www.x.com/a/?ref=1"),
        normalize_url("http://x.com/a")
    );
}

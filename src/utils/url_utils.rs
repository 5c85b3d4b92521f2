//! URL manipulation utilities.
//!
//! The central function here is [`normalize_url`], which produces the lossy
//! dedup key used by the dedup index and the retry ledger. Two URLs that
//! differ only in scheme, `www.` prefix, trailing slash, query string or
//! fragment collapse to the same key. This policy is deliberate: tracking
//! parameters and scheme upgrades must never cause the same document to be
//! processed twice.

use url::Url;

/// Normalize a URL into its dedup key.
///
/// Steps, in order: lower-case, strip scheme, strip a leading `www.`,
/// strip the query string and fragment, strip a trailing slash.
///
/// The function is total: inputs that do not parse as URLs are normalized
/// textually with the same rules, so historical records with odd entries
/// still produce stable keys.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().to_lowercase();

    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(&trimmed);

    // Stripped repeatedly so the result is a fixpoint even for hosts like
    // www.www.example.com
    let mut without_www = without_scheme;
    while let Some(rest) = without_www.strip_prefix("www.") {
        without_www = rest;
    }

    // Query string and fragment never distinguish documents for our purposes
    let without_query = without_www
        .split_once('?')
        .map_or(without_www, |(head, _)| head);
    let without_fragment = without_query
        .split_once('#')
        .map_or(without_query, |(head, _)| head);

    without_fragment.trim_end_matches('/').to_string()
}

/// Check if a URL is a crawlable http(s) URL
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    // Skip data URLs, javascript URLs, and other non-http schemes
    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Extract the host portion of a URL string
pub fn extract_domain(url_str: &str) -> Result<String, String> {
    match Url::parse(url_str) {
        Ok(url) => {
            if let Some(host) = url.host_str() {
                Ok(host.to_string())
            } else {
                Err(format!("URL has no host: {url_str}"))
            }
        }
        Err(e) => Err(format!("Failed to parse URL {url_str}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_scheme_and_www() {
        assert_eq!(
            normalize_url("https://www.example.com/a"),
            normalize_url("http://example.com/a")
        );
        assert_eq!(normalize_url("https://www.example.com/a"), "example.com/a");
    }

    #[test]
    fn test_normalize_strips_query_fragment_slash() {
        assert_eq!(
            normalize_url("https://www.x.com/a/?ref=1"),
            normalize_url("http://x.com/a")
        );
        assert_eq!(normalize_url("https://x.com/a#section"), "x.com/a");
        assert_eq!(normalize_url("https://x.com/a/"), "x.com/a");
    }

    #[test]
    fn test_normalize_idempotent() {
        for u in [
            "https://www.golf.example.com/news/story?utm_source=feed#top",
            "HTTP://EXAMPLE.COM/PATH/",
            "example.com/bare",
            "",
        ] {
            let once = normalize_url(u);
            assert_eq!(normalize_url(&once), once);
        }
    }

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url("https://example.com/a"));
        assert!(!is_valid_url("javascript:void(0)"));
        assert!(!is_valid_url("mailto:a@b.c"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://sub.example.com:8080/p?q=1").expect("valid URL"),
            "sub.example.com"
        );
        assert!(extract_domain("not a url").is_err());
    }
}

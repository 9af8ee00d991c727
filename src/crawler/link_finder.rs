//! Endpoint discovery in JavaScript sources
//!
//! Fetched HTML pages are scanned for `<script src>` references. The scripts
//! are then fetched by the engine's link-finder tasks and scanned with the
//! LinkFinder endpoint expression; endpoints on the crawled host are visited.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<script[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#).expect("valid script regex")
});

static ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?:"|')("#,
        r#"((?:[a-zA-Z]{1,10}://|//)[^"'/]{1,}\.[a-zA-Z]{2,}[^"']{0,})"#,
        r#"|((?:/|\.\./|\./)[^"'><,;| *()(%$^/\\\[\]][^"'><,;|()]{1,})"#,
        r#"|([a-zA-Z0-9_\-/]{1,}/[a-zA-Z0-9_\-/]{1,}\.(?:[a-zA-Z]{1,4}|action)(?:[\?|#][^"|']{0,}|))"#,
        r#"|([a-zA-Z0-9_\-/]{1,}/[a-zA-Z0-9_\-/]{3,}(?:[\?|#][^"|']{0,}|))"#,
        r#"|([a-zA-Z0-9_\-]{1,}\.(?:php|asp|aspx|jsp|json|action|html|js|txt|xml)(?:[\?|#][^"|']{0,}|))"#,
        r#")(?:"|')"#,
    ))
    .expect("valid endpoint regex")
});

/// Scripts referenced by an HTML page, resolved against the page URL
pub fn script_sources(html: &str, page: &Url) -> Vec<Url> {
    SCRIPT_SRC
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|src| page.join(src.as_str().trim()).ok())
        .collect()
}

/// Raw endpoint strings found in a script, in order of first appearance
pub fn find_endpoints(script: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    ENDPOINT
        .captures_iter(script)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|endpoint| seen.insert(endpoint.clone()))
        .collect()
}

/// Resolve endpoints against the script URL, keeping those on `host`
pub fn resolve_endpoints(endpoints: &[String], script: &Url, host: &str) -> Vec<Url> {
    endpoints
        .iter()
        .filter_map(|endpoint| script.join(endpoint).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter(|url| url.host_str() == Some(host))
        .collect()
}

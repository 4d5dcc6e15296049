//! Source URL normalization used for duplicate detection.

use url::Url;

/// Query parameters that only track where a link was shared from.
const TRACKING_PARAMS: &[&str] = &["ref", "s", "t", "fbclid", "gclid", "cmpid", "smid"];

/// Canonical form of a source URL.
///
/// Lowercases scheme and host, strips `www.`, folds `twitter.com` into
/// `x.com`, drops the fragment, tracking parameters and any trailing `/`.
/// Strings that do not parse as URLs are trimmed and lowercased instead.
pub fn normalize_source_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_ascii_lowercase();
    };

    url.set_fragment(None);

    if let Some(host) = url.host_str().map(str::to_ascii_lowercase) {
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let host = host.strip_prefix("mobile.").unwrap_or(host);
        let host = if host == "twitter.com" { "x.com" } else { host };
        // Only fails for cannot-be-a-base URLs, which have no host anyway.
        let _ = url.set_host(Some(host));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut normalized = url.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

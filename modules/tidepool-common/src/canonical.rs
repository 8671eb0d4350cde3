//! URL canonicalization — the stable identity key all dedup hangs off.
//!
//! Two URLs that differ only in tracking params, host casing, `www.` prefix,
//! fragment, or query ordering must canonicalize to the same string.

/// Query parameters that carry tracking state, never content identity.
const TRACKING_PARAMS: &[&str] = &[
    "_dt",
    "fbclid",
    "gclid",
    "msclkid",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "mc_cid",
    "mc_eid",
    "ref",
    "ref_src",
    "cmpid",
];

/// Normalize a raw URL into its canonical identity.
///
/// - scheme lowered, `http` upgraded to `https` (trivial redirect-by-convention)
/// - host lowered, leading `www.` stripped, default ports dropped
/// - fragment removed
/// - tracking params removed, remaining query pairs sorted by key
/// - trailing slash stripped from non-root paths
///
/// Unparseable input is returned trimmed but otherwise untouched — a broken
/// URL still needs a stable key for dedup and audit.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    if parsed.scheme() == "http" {
        // set_scheme only fails for non-special schemes; http -> https is fine
        let _ = parsed.set_scheme("https");
    }

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        let stripped = lowered.strip_prefix("www.").unwrap_or(&lowered).to_string();
        let _ = parsed.set_host(Some(&stripped));
    }
    let _ = parsed.set_port(None);

    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    // Trailing slash is not identity: /a/ and /a must collide, with or
    // without a query string.
    let path = parsed.path().to_string();
    if path != "/" && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    let mut out = parsed.to_string();
    if out.ends_with('/') && parsed.path() == "/" && parsed.query().is_none() {
        // bare root: https://example.com/ -> https://example.com
        out.pop();
    }
    out
}

/// Extract the canonical host of a URL (lowercase, no `www.`).
/// Returns an empty string for unparseable input.
pub fn host_of(raw: &str) -> String {
    url::Url::parse(raw.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|h| h.strip_prefix("www.").unwrap_or(&h).to_string())
        .unwrap_or_default()
}

/// True when two URLs share a canonical host.
pub fn same_host(a: &str, b: &str) -> bool {
    let ha = host_of(a);
    !ha.is_empty() && ha == host_of(b)
}

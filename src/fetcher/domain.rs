//! URL helpers: registrable domains and tracking-parameter stripping.

use std::net::IpAddr;
use url::Url;

/// Query parameters that only identify the referrer or campaign.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid"];

/// Registrable domain (public suffix + one label) of a URL's host.
///
/// `https://uk.finance.yahoo.com/x` -> `yahoo.com`, `https://www.bbc.co.uk` ->
/// `bbc.co.uk`. IP literals and single-label hosts are returned unchanged.
pub fn registrable_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return None;
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() || !host.contains('.') {
        return Some(host);
    }
    Some(
        psl::domain_str(&host)
            .map(str::to_string)
            .unwrap_or(host),
    )
}

/// Same as [`registrable_domain`] but for an unparsed string.
pub fn domain_of(raw: &str) -> Option<String> {
    Url::parse(raw).ok().as_ref().and_then(registrable_domain)
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Strip tracking parameters and re-encode the remaining query canonically.
///
/// Parameter order is preserved and blank values are kept; an empty query is
/// removed entirely so `https://a.com/x?utm_source=y` becomes `https://a.com/x`.
pub fn clean_url(url: &Url) -> Url {
    let mut cleaned = url.clone();
    if url.query().is_none() {
        return cleaned;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}

/// Parse and clean; the de-duplication key for a target URL.
pub fn normalize_target(raw: &str) -> Option<Url> {
    let parsed = Url::parse(raw.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(clean_url(&parsed)),
        _ => None,
    }
}

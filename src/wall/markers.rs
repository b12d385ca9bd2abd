//! Consent-management markup detection on raw HTML.

use url::Url;

/// Lowercase substrings that only appear in consent interstitials: CMP
/// container ids, consent hostnames and literal banner phrases.
pub const CONSENT_HTML_MARKERS: &[&str] = &[
    // vendor containers
    "ot-sdk-container",
    "onetrust-consent-sdk",
    "qc-cmp2-container",
    "sp_message_container",
    "cmp__container",
    "didomi-popup",
    "truste-consent-track",
    "cookie-banner",
    // consent interstitial hosts
    "guce.yahoo.com",
    "consent.yahoo.com",
    "consent.google.com",
    // banner phrases
    "yahoo is part of the yahoo family of brands",
    "manage privacy settings",
    "your privacy choices",
    "before you continue to",
    "antes de continuar",
];

/// Hosts that only ever serve consent interstitials.
pub const CONSENT_HOSTS: &[&str] = &["guce.yahoo.com", "consent.yahoo.com", "consent.google.com"];

/// First marker found in `html`, if any. Pure containment on the lowercased source.
pub fn find_marker(html: &str) -> Option<&'static str> {
    if html.is_empty() {
        return None;
    }
    let lower = html.to_lowercase();
    CONSENT_HTML_MARKERS
        .iter()
        .copied()
        .find(|marker| lower.contains(marker))
}

pub fn looks_like_wall_html(html: &str) -> bool {
    find_marker(html).is_some()
}

/// A redirect chain that ends on a consent host never reached the article.
pub fn is_consent_host(url: &Url) -> bool {
    url.host_str()
        .map(|host| {
            let host = host.to_lowercase();
            CONSENT_HOSTS.iter().any(|h| host == *h)
        })
        .unwrap_or(false)
}

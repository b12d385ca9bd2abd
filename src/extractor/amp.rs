//! AMP-variant discovery.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Candidate AMP URLs for a page, best first, without duplicates.
///
/// 1. `<link rel="amphtml" href>` declared by the page.
/// 2. The page URL with `/amp` appended to its path.
/// 3. For `amp_domains`, the `/amphtml/<path>` template on the same host.
///
/// A page that already is an AMP rendition yields only its declared link.
pub fn amp_candidates(html: &str, page_url: &Url, amp_domains: &HashSet<String>) -> Vec<Url> {
    let mut candidates = Vec::new();
    let mut push = |url: Url| {
        if &url != page_url && !candidates.contains(&url) {
            candidates.push(url);
        }
    };

    if let Some(declared) = declared_amp_link(html, page_url) {
        push(declared);
    }
    if is_amp_path(page_url) {
        return candidates;
    }
    push(amp_suffix(page_url));
    if let Some(templated) = amp_template(page_url, amp_domains) {
        push(templated);
    }
    candidates
}

pub fn declared_amp_link(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("link[rel][href]").ok()?;
    document
        .select(&selector)
        .filter(|el| {
            el.value()
                .attr("rel")
                .map(|rel| {
                    rel.split_ascii_whitespace()
                        .any(|token| token.eq_ignore_ascii_case("amphtml"))
                })
                .unwrap_or(false)
        })
        .find_map(|el| {
            let url = base.join(el.value().attr("href")?.trim()).ok()?;
            matches!(url.scheme(), "http" | "https").then_some(url)
        })
}

fn is_amp_path(url: &Url) -> bool {
    let path = url.path().trim_end_matches('/');
    path.ends_with("/amp") || path.starts_with("/amphtml/")
}

fn amp_suffix(url: &Url) -> Url {
    let mut amp = url.clone();
    let path = url.path().trim_end_matches('/');
    amp.set_path(&format!("{path}/amp"));
    amp.set_query(None);
    amp.set_fragment(None);
    amp
}

/// `https://finance.yahoo.com/news/a-b.html` -> `https://finance.yahoo.com/amphtml/news/a-b.html`.
pub fn amp_template(url: &Url, amp_domains: &HashSet<String>) -> Option<Url> {
    let host = url.host_str()?.to_lowercase();
    if !amp_domains.contains(&host) {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return None;
    }
    let mut amp = url.clone();
    amp.set_path(&format!("/amphtml/{}", segments.join("/")));
    amp.set_query(None);
    amp.set_fragment(None);
    Some(amp)
}

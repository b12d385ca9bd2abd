//! Tracker-URL resolution.
//!
//! A news-API link usually points at an aggregator or redirect endpoint. The
//! resolver follows it to the publisher page and picks the URL the publisher
//! declares as canonical, unless that declaration itself looks like tracking.

use scraper::{Html, Selector};
use std::fmt::{Display, Formatter};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::fetcher::client::rotating_headers;
use crate::fetcher::{
    FetchError, FetchResult, Fetcher, clean_url, parse_http_url, registrable_domain,
};
use crate::wall::markers::is_consent_host;

/// Where the chosen URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Terminal URL of a redirecting HEAD request.
    HeadRedirect,
    /// `<link rel="canonical">` or `og:url` of the fetched page.
    Canonical,
    /// Terminal URL of the GET, canonical missing or rejected.
    Terminal,
    Unresolved,
}

impl Display for ResolutionSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::HeadRedirect => "head_redirect",
            Self::Canonical => "canonical",
            Self::Terminal => "terminal",
            Self::Unresolved => "unresolved",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedUrl {
    pub input: String,
    /// Chosen URL with tracking parameters removed.
    pub url: Option<Url>,
    pub terminal_url: Option<Url>,
    pub canonical_url: Option<Url>,
    pub domain: Option<String>,
    pub status: Option<u16>,
    pub source: ResolutionSource,
    pub error: Option<FetchError>,
    /// The GET response, when resolution needed one.
    pub page: Option<FetchResult>,
}

impl ResolvedUrl {
    fn unresolved(input: &str, status: Option<u16>, error: FetchError) -> Self {
        Self {
            input: input.to_string(),
            url: None,
            terminal_url: None,
            canonical_url: None,
            domain: None,
            status,
            source: ResolutionSource::Unresolved,
            error: Some(error),
            page: None,
        }
    }

    fn chosen(input: &str, chosen: &Url, status: Option<u16>, source: ResolutionSource) -> Self {
        let url = clean_url(chosen);
        Self {
            input: input.to_string(),
            domain: registrable_domain(&url),
            url: Some(url),
            terminal_url: None,
            canonical_url: None,
            status,
            source,
            error: None,
            page: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.url.is_some()
    }
}

/// Canonical hints declared by a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageHints {
    pub canonical: Option<Url>,
    pub og_url: Option<Url>,
}

impl PageHints {
    /// Extract `rel=canonical` and `og:url`, resolving relative references
    /// against `base`.
    pub fn parse(html: &str, base: &Url) -> Self {
        let document = Html::parse_document(html);

        let canonical = Selector::parse("link[rel][href]").ok().and_then(|selector| {
            document
                .select(&selector)
                .filter(|el| {
                    el.value()
                        .attr("rel")
                        .map(|rel| rel.to_ascii_lowercase().contains("canonical"))
                        .unwrap_or(false)
                })
                .find_map(|el| absolutize(el.value().attr("href")?, base))
        });

        let og_url = Selector::parse(r#"meta[property="og:url"][content]"#)
            .ok()
            .and_then(|selector| {
                document
                    .select(&selector)
                    .find_map(|el| absolutize(el.value().attr("content")?, base))
            });

        Self { canonical, og_url }
    }

    /// Canonical link first, then Open Graph.
    pub fn preferred(&self) -> Option<&Url> {
        self.canonical.as_ref().or(self.og_url.as_ref())
    }
}

fn absolutize(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// True when a URL carries one of `markers` or points at an AMP rendition.
pub fn looks_like_tracking(url: &Url, markers: &[String]) -> bool {
    let lower = url.as_str().to_lowercase();
    if markers.iter().any(|m| lower.contains(m.as_str())) {
        return true;
    }
    let path = url.path().to_lowercase();
    let path = path.trim_end_matches('/');
    path.ends_with("/amp") || path.ends_with(".amp") || path.ends_with(".amp.html") || path.contains("/amphtml/")
}

#[derive(Clone)]
pub struct RedirectResolver {
    fetcher: Fetcher,
    tracking_markers: Vec<String>,
}

impl RedirectResolver {
    pub fn new(fetcher: Fetcher, tracking_markers: Vec<String>) -> Self {
        Self {
            fetcher,
            tracking_markers: tracking_markers.into_iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &Config, fetcher: Fetcher) -> Self {
        Self::new(fetcher, config.tracking_markers.clone())
    }

    /// Follow `tracker_url` to the publisher's preferred article URL.
    ///
    /// A redirecting HEAD request is accepted as is; otherwise the page is
    /// fetched and its canonical hints are consulted. On failure the result
    /// carries no URL and the error of the GET.
    #[instrument(skip(self), fields(url = %tracker_url))]
    pub async fn resolve(&self, tracker_url: &str) -> ResolvedUrl {
        let input = match parse_http_url(tracker_url) {
            Ok(url) => url,
            Err(e) => return ResolvedUrl::unresolved(tracker_url, None, e),
        };

        if let Some((terminal, status)) = self.follow_head(&input).await
            && head_is_conclusive(&input, &terminal)
        {
            debug!(terminal = %terminal, status, "resolved by head request");
            let mut resolved = ResolvedUrl::chosen(
                tracker_url,
                &terminal,
                Some(status),
                ResolutionSource::HeadRedirect,
            );
            resolved.terminal_url = Some(terminal);
            return resolved;
        }

        let page = self.fetcher.fetch(input.as_str()).await;
        let terminal = match (&page.final_url, page.is_success()) {
            (Some(url), true) => url.clone(),
            _ => {
                let error = page
                    .error
                    .clone()
                    .unwrap_or_else(|| FetchError::Unknown("empty response".to_string()));
                warn!(error = %error, status = ?page.status, "resolution failed");
                return ResolvedUrl::unresolved(tracker_url, page.status, error);
            }
        };

        let hints = match page.html() {
            Some(html) => parse_hints(html.to_string(), terminal.clone()).await,
            None => PageHints::default(),
        };

        let canonical = hints.preferred().cloned();
        let (chosen, source) = match &canonical {
            Some(c) if !looks_like_tracking(c, &self.tracking_markers) => {
                (c.clone(), ResolutionSource::Canonical)
            }
            Some(c) => {
                debug!(canonical = %c, "canonical looks like tracking, keeping terminal url");
                (terminal.clone(), ResolutionSource::Terminal)
            }
            None => (terminal.clone(), ResolutionSource::Terminal),
        };

        let mut resolved = ResolvedUrl::chosen(tracker_url, &chosen, page.status, source);
        resolved.terminal_url = Some(terminal);
        resolved.canonical_url = canonical;
        resolved.page = Some(page);
        debug!(chosen = ?resolved.url.as_ref().map(Url::as_str), source = %source, "resolved");
        resolved
    }

    /// Single HEAD request following redirects. `None` on any failure or a
    /// status of 400 and above.
    async fn follow_head(&self, url: &Url) -> Option<(Url, u16)> {
        let domain = registrable_domain(url).unwrap_or_default();
        self.fetcher.limiter().acquire(&domain).await;

        match self
            .fetcher
            .client()
            .head(url.clone())
            .headers(rotating_headers())
            .send()
            .await
        {
            Ok(response) if response.status().as_u16() < 400 => {
                Some((response.url().clone(), response.status().as_u16()))
            }
            Ok(response) => {
                debug!(status = response.status().as_u16(), "head request rejected");
                None
            }
            Err(e) => {
                debug!(error = %e, "head request failed");
                None
            }
        }
    }
}

/// A HEAD that moved somewhere other than a consent interstitial.
fn head_is_conclusive(input: &Url, terminal: &Url) -> bool {
    terminal != input && !is_consent_host(terminal)
}

async fn parse_hints(html: String, base: Url) -> PageHints {
    tokio::task::spawn_blocking(move || PageHints::parse(&html, &base))
        .await
        .unwrap_or_default()
}

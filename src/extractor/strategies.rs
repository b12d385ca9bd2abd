//! The four extraction strategies, in chain order.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::extractor::amp::amp_candidates;
use crate::extractor::model::{PageContext, StrategyKind, StrategyOutcome};
use crate::extractor::reader;
use crate::extractor::render::{PageRenderer, RenderError};
use crate::fetcher::{Fetcher, RateLimiter, registrable_domain};
use crate::wall::WallDetector;
use crate::wall::markers::{find_marker, is_consent_host};

/// Slack on top of the navigation timeout for consent clicks and capture.
const RENDER_GRACE: Duration = Duration::from_secs(5);

/// One way of turning a page into candidate article text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(&self, ctx: &PageContext) -> StrategyOutcome;
}

/// Run a parser off the async workers. A panic inside it is a strategy
/// failure, not a crash.
async fn run_parser<F>(parse: F) -> StrategyOutcome
where
    F: FnOnce() -> Option<String> + Send + 'static,
{
    match tokio::task::spawn_blocking(parse).await {
        Ok(Some(text)) => StrategyOutcome::text(text),
        Ok(None) => StrategyOutcome::Rejected("no_content".to_string()),
        Err(e) => StrategyOutcome::Failed(format!("parser panicked: {e}")),
    }
}

/// Readability over the HTML already fetched for the item.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticStrategy;

#[async_trait]
impl ExtractionStrategy for StaticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Static
    }

    async fn attempt(&self, ctx: &PageContext) -> StrategyOutcome {
        if is_consent_host(&ctx.final_url) {
            return StrategyOutcome::Rejected("consent_interstitial".to_string());
        }

        let marker = find_marker(&ctx.html);
        let html = ctx.html.clone();
        let url = ctx.final_url.clone();
        let outcome = run_parser(move || reader::readability_extract(&html, &url)).await;

        // Consent markup alone is common in footers; it only counts when the
        // extracted text reads like a wall too.
        match (marker, outcome) {
            (Some(marker), StrategyOutcome::Success { text, .. })
                if WallDetector::new().classify(None, Some(&text)).is_wall =>
            {
                debug!(marker, "consent markup with wall text");
                StrategyOutcome::Rejected("consent_markup".to_string())
            }
            (Some(marker), StrategyOutcome::Rejected(_)) => {
                debug!(marker, "consent markup without article text");
                StrategyOutcome::Rejected("consent_markup".to_string())
            }
            (_, outcome) => outcome,
        }
    }
}

/// Fetch an AMP rendition and extract from it.
#[derive(Clone)]
pub struct AmpStrategy {
    fetcher: Fetcher,
    amp_domains: HashSet<String>,
}

impl AmpStrategy {
    pub fn new(fetcher: Fetcher, amp_domains: HashSet<String>) -> Self {
        Self {
            fetcher,
            amp_domains,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for AmpStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Amp
    }

    #[instrument(skip_all, fields(url = %ctx.final_url))]
    async fn attempt(&self, ctx: &PageContext) -> StrategyOutcome {
        let html = ctx.html.clone();
        let page_url = ctx.final_url.clone();
        let domains = self.amp_domains.clone();
        let candidates =
            match tokio::task::spawn_blocking(move || amp_candidates(&html, &page_url, &domains)).await {
                Ok(candidates) => candidates,
                Err(e) => return StrategyOutcome::Failed(format!("parser panicked: {e}")),
            };
        if candidates.is_empty() {
            return StrategyOutcome::Rejected("no_amp_variant".to_string());
        }

        for candidate in candidates {
            let result = self.fetcher.fetch(candidate.as_str()).await;
            let Some(body) = result.html() else {
                debug!(
                    candidate = %candidate,
                    error = ?result.error.as_ref().map(|e| e.reason()),
                    "amp candidate unavailable"
                );
                continue;
            };

            let source = result.final_url.clone().unwrap_or(candidate);
            let body = body.to_string();
            let base = source.clone();
            return match run_parser(move || reader::extract(&body, &base)).await {
                StrategyOutcome::Success { text, .. } => StrategyOutcome::Success {
                    text,
                    source_url: Some(source),
                },
                other => other,
            };
        }

        StrategyOutcome::Rejected("amp_unavailable".to_string())
    }
}

/// Headless-browser rendering, bounded by its own semaphore.
pub struct RenderedStrategy {
    renderer: Arc<dyn PageRenderer>,
    limiter: RateLimiter,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl RenderedStrategy {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        limiter: RateLimiter,
        concurrency: usize,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            limiter,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout: navigation_timeout + RENDER_GRACE,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for RenderedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rendered
    }

    #[instrument(skip_all, fields(url = %ctx.final_url))]
    async fn attempt(&self, ctx: &PageContext) -> StrategyOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return StrategyOutcome::Failed("render pool closed".to_string());
        };

        let domain = registrable_domain(&ctx.final_url).unwrap_or_default();
        self.limiter.acquire(&domain).await;

        let rendered =
            match tokio::time::timeout(self.timeout, self.renderer.render(&ctx.final_url)).await {
                Ok(Ok(html)) => html,
                Ok(Err(e)) => return StrategyOutcome::Failed(e.to_string()),
                Err(_) => return StrategyOutcome::Failed(RenderError::Timeout.to_string()),
            };

        let url = ctx.final_url.clone();
        run_parser(move || reader::extract(&rendered, &url)).await
    }
}

/// Whole-page extraction on a fresh copy of the page, or on the original
/// HTML when that fetch fails.
#[derive(Clone)]
pub struct GenericFallbackStrategy {
    fetcher: Fetcher,
}

impl GenericFallbackStrategy {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ExtractionStrategy for GenericFallbackStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GenericFallback
    }

    #[instrument(skip_all, fields(url = %ctx.final_url))]
    async fn attempt(&self, ctx: &PageContext) -> StrategyOutcome {
        let refetched = self.fetcher.fetch(ctx.final_url.as_str()).await;
        let html = match refetched.html() {
            Some(body) => body.to_string(),
            None => {
                debug!("refetch failed, using original html");
                ctx.html.clone()
            }
        };
        run_parser(move || reader::generic_extract(&html)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::render::MockPageRenderer;
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn context(url: &str, html: &str) -> PageContext {
        let url = Url::parse(url).unwrap();
        PageContext {
            requested_url: url.clone(),
            final_url: url,
            status: Some(200),
            html: html.to_string(),
        }
    }

    fn article_html() -> String {
        format!(
            "<html><head><title>Story</title></head><body><article><h1>Story</h1><p>{}</p></article></body></html>",
            "The port authority said container volumes rose for a third month as retailers restocked. ".repeat(15)
        )
    }

    #[tokio::test]
    async fn test_static_extracts_article() {
        let outcome = StaticStrategy
            .attempt(&context("https://news.example.com/a", &article_html()))
            .await;
        match outcome {
            StrategyOutcome::Success { text, source_url } => {
                assert!(text.contains("container volumes"));
                assert_eq!(source_url, None);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_static_ignores_privacy_footer() {
        let html = format!(
            "<html><body><article><h1>Story</h1><p>{}</p></article>\
             <footer><a href=\"/privacy\">Your Privacy Choices</a></footer></body></html>",
            "The port authority said container volumes rose for a third month as retailers restocked. ".repeat(20)
        );
        let outcome = StaticStrategy
            .attempt(&context("https://news.example.com/a", &html))
            .await;
        assert!(matches!(outcome, StrategyOutcome::Success { ref text, .. } if text.contains("container volumes")));
    }

    #[tokio::test]
    async fn test_static_rejects_consent_pages() {
        let html = r#"<html><body><div id="onetrust-consent-sdk"></div></body></html>"#;
        let outcome = StaticStrategy
            .attempt(&context("https://news.example.com/a", html))
            .await;
        assert_eq!(outcome, StrategyOutcome::Rejected("consent_markup".into()));

        let paragraphs: String = crate::wall::text::TEMPLATE_EN
            .lines()
            .map(|line| format!("<p>{line}</p>"))
            .collect();
        let html = format!("<html><body><article>{paragraphs}</article></body></html>");
        let outcome = StaticStrategy
            .attempt(&context("https://news.example.com/a", &html))
            .await;
        assert_eq!(outcome, StrategyOutcome::Rejected("consent_markup".into()));

        let outcome = StaticStrategy
            .attempt(&context("https://consent.yahoo.com/v2/collectConsent", &article_html()))
            .await;
        assert_eq!(outcome, StrategyOutcome::Rejected("consent_interstitial".into()));
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(
            RateLimiter::new(Duration::ZERO),
            crate::fetcher::RetryPolicy {
                max_attempts: 1,
                ..Default::default()
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn html_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_string(body)
            .insert_header("Content-Type", "text/html; charset=utf-8")
    }

    #[tokio::test]
    async fn test_amp_fetches_declared_variant() {
        let server = MockServer::start().await;
        let amp_url = format!("{}/story/amp", server.uri());
        Mock::given(method("GET"))
            .and(path("/story/amp"))
            .respond_with(html_response(article_html()))
            .expect(1)
            .mount(&server)
            .await;

        let page = format!(
            r#"<html><head><link rel="amphtml" href="{amp_url}"></head><body><p>Teaser.</p></body></html>"#
        );
        let outcome = AmpStrategy::new(fetcher(), HashSet::new())
            .attempt(&context(&format!("{}/story", server.uri()), &page))
            .await;

        match outcome {
            StrategyOutcome::Success { text, source_url } => {
                assert!(text.contains("container volumes"));
                assert_eq!(source_url.unwrap().as_str(), amp_url);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_amp_candidates_all_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = AmpStrategy::new(fetcher(), HashSet::new())
            .attempt(&context(&format!("{}/story", server.uri()), "<p>Teaser.</p>"))
            .await;
        assert_eq!(outcome, StrategyOutcome::Rejected("amp_unavailable".into()));
    }

    #[tokio::test]
    async fn test_generic_refetches_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .respond_with(html_response(article_html()))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = GenericFallbackStrategy::new(fetcher())
            .attempt(&context(&format!("{}/story", server.uri()), "<html></html>"))
            .await;
        assert!(matches!(outcome, StrategyOutcome::Success { ref text, .. } if text.contains("port authority")));
    }

    #[tokio::test]
    async fn test_generic_uses_original_html_when_refetch_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = GenericFallbackStrategy::new(fetcher())
            .attempt(&context(&format!("{}/story", server.uri()), &article_html()))
            .await;
        assert!(matches!(outcome, StrategyOutcome::Success { ref text, .. } if text.contains("port authority")));
    }

    #[tokio::test]
    async fn test_generic_output_goes_through_gate() {
        let server = MockServer::start().await;
        let paragraphs: String = crate::wall::text::TEMPLATE_EN
            .lines()
            .map(|line| format!("<p>{line}</p>"))
            .collect();
        Mock::given(method("GET"))
            .and(path("/story"))
            .respond_with(html_response(format!("<html><body><div>{paragraphs}</div></body></html>")))
            .mount(&server)
            .await;

        let chain = crate::extractor::ExtractionChain::new(
            vec![Box::new(GenericFallbackStrategy::new(fetcher()))],
            crate::extractor::QualityGate::new(50, vec![]),
        );
        let report = chain
            .run(&context(&format!("{}/story", server.uri()), "<html></html>"))
            .await;

        assert!(report.accepted.is_none());
        assert_eq!(report.attempts[0].strategy, StrategyKind::GenericFallback);
        assert_eq!(report.attempts[0].rejection.as_deref(), Some("cookie_wall"));
        assert!(report.last_text().unwrap().contains("Yahoo family of brands"));
    }

    #[tokio::test]
    async fn test_rendered_uses_renderer_output() {
        let mut renderer = MockPageRenderer::new();
        let html = article_html();
        renderer
            .expect_render()
            .times(1)
            .returning(move |_| Ok(html.clone()));

        let strategy = RenderedStrategy::new(
            Arc::new(renderer),
            RateLimiter::new(Duration::ZERO),
            2,
            Duration::from_secs(1),
        );
        let outcome = strategy
            .attempt(&context("https://news.example.com/a", "<html></html>"))
            .await;
        assert!(matches!(outcome, StrategyOutcome::Success { ref text, .. } if text.contains("port authority")));
    }

    #[tokio::test]
    async fn test_rendered_failure_is_failed_outcome() {
        let mut renderer = MockPageRenderer::new();
        renderer
            .expect_render()
            .returning(|_| Err(RenderError::Navigation("net::ERR_ABORTED".into())));

        let strategy = RenderedStrategy::new(
            Arc::new(renderer),
            RateLimiter::new(Duration::ZERO),
            1,
            Duration::from_secs(1),
        );
        let outcome = strategy
            .attempt(&context("https://news.example.com/a", ""))
            .await;
        assert_eq!(
            outcome,
            StrategyOutcome::Failed("navigation failed: net::ERR_ABORTED".into())
        );
    }
}

pub mod amp;
pub mod model;
pub mod quality;
pub mod reader;
pub mod render;
pub mod strategies;

pub use model::{ChainReport, ExtractionAttempt, Extracted, PageContext, StrategyKind, StrategyOutcome};
pub use quality::{QualityGate, Rejection};
pub use render::{PageRenderer, RenderError};
pub use strategies::{
    AmpStrategy, ExtractionStrategy, GenericFallbackStrategy, RenderedStrategy, StaticStrategy,
};

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::fetcher::{FailureKind, Fetcher};
use model::normalize_whitespace;

/// Reason recorded when every strategy ran and none passed the gate.
pub const EXHAUSTED_REASON: &str = "cookie_wall_or_too_short";

/// Ordered strategies plus the quality gate that judges each one's output.
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    gate: QualityGate,
}

impl ExtractionChain {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>, gate: QualityGate) -> Self {
        Self { strategies, gate }
    }

    /// static, amp, rendered (when enabled and a renderer is given),
    /// generic-fallback.
    pub fn from_config(
        config: &Config,
        fetcher: Fetcher,
        renderer: Option<Arc<dyn PageRenderer>>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(StaticStrategy),
            Box::new(AmpStrategy::new(fetcher.clone(), config.amp_domains.clone())),
        ];
        if config.render
            && let Some(renderer) = renderer
        {
            strategies.push(Box::new(RenderedStrategy::new(
                renderer,
                fetcher.limiter().clone(),
                config.render_concurrency,
                config.render_timeout,
            )));
        }
        strategies.push(Box::new(GenericFallbackStrategy::new(fetcher)));

        Self::new(strategies, QualityGate::from_config(config))
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Run strategies in order until one passes the quality gate.
    ///
    /// Strategies never run concurrently. Failures inside a strategy are
    /// recorded on its attempt and the chain moves on.
    #[instrument(skip_all, fields(url = %ctx.final_url))]
    pub async fn run(&self, ctx: &PageContext) -> ChainReport {
        let mut report = ChainReport::default();

        for strategy in &self.strategies {
            let kind = strategy.kind();
            let attempt = match strategy.attempt(ctx).await {
                StrategyOutcome::Success { text, source_url } => {
                    let text = normalize_whitespace(&text);
                    match self.gate.check(&text) {
                        Ok(accepted) => {
                            info!(strategy = %kind, words = model::word_count(&accepted), "accepted");
                            report.attempts.push(ExtractionAttempt {
                                strategy: kind,
                                text: Some(accepted.clone()),
                                accepted: true,
                                rejection: None,
                            });
                            report.accepted = Some(Extracted {
                                text: accepted,
                                strategy: kind,
                                source_url,
                            });
                            return report;
                        }
                        Err(rejection) => {
                            debug!(strategy = %kind, rejection = %rejection, "rejected by quality gate");
                            ExtractionAttempt {
                                strategy: kind,
                                text: Some(text),
                                accepted: false,
                                rejection: Some(rejection.reason().to_string()),
                            }
                        }
                    }
                }
                StrategyOutcome::Rejected(reason) => {
                    debug!(strategy = %kind, reason, "strategy produced nothing");
                    ExtractionAttempt {
                        strategy: kind,
                        text: None,
                        accepted: false,
                        rejection: Some(reason),
                    }
                }
                StrategyOutcome::Failed(error) => {
                    warn!(strategy = %kind, error, "strategy failed");
                    ExtractionAttempt {
                        strategy: kind,
                        text: None,
                        accepted: false,
                        rejection: Some(format!("{}:{error}", FailureKind::ExtractionException)),
                    }
                }
            };
            report.attempts.push(attempt);
        }

        report
    }

    /// Accepted text and the strategy that produced it, if any.
    pub async fn extract(&self, url: &Url, html: &str) -> Option<(String, StrategyKind)> {
        let ctx = PageContext {
            requested_url: url.clone(),
            final_url: url.clone(),
            status: None,
            html: html.to_string(),
        };
        self.run(&ctx)
            .await
            .accepted
            .map(|extracted| (extracted.text, extracted.strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strategies::MockExtractionStrategy;

    fn words(n: usize) -> String {
        let pool = [
            "The", "refinery", "restarted", "two", "units", "after", "a", "brief", "outage",
            "that", "lifted", "regional", "fuel", "prices", "this", "week.",
        ];
        pool.iter().cycle().take(n).copied().collect::<Vec<_>>().join(" ")
    }

    fn context() -> PageContext {
        let url = Url::parse("https://news.example.com/story").unwrap();
        PageContext {
            requested_url: url.clone(),
            final_url: url,
            status: Some(200),
            html: "<html></html>".to_string(),
        }
    }

    fn strategy(
        kind: StrategyKind,
        outcome: Option<StrategyOutcome>,
    ) -> Box<dyn ExtractionStrategy> {
        let mut mock = MockExtractionStrategy::new();
        mock.expect_kind().return_const(kind);
        match outcome {
            Some(outcome) => {
                mock.expect_attempt()
                    .times(1)
                    .returning(move |_| outcome.clone());
            }
            None => {
                mock.expect_attempt().times(0);
            }
        }
        Box::new(mock)
    }

    fn gate() -> QualityGate {
        QualityGate::new(120, vec!["all rights reserved.".into()])
    }

    #[tokio::test]
    async fn test_short_static_falls_through_to_amp() {
        let chain = ExtractionChain::new(
            vec![
                strategy(StrategyKind::Static, Some(StrategyOutcome::text(words(40)))),
                strategy(StrategyKind::Amp, Some(StrategyOutcome::text(words(300)))),
                strategy(StrategyKind::Rendered, None),
                strategy(StrategyKind::GenericFallback, None),
            ],
            gate(),
        );

        let report = chain.run(&context()).await;
        let accepted = report.accepted.as_ref().unwrap();
        assert_eq!(accepted.strategy, StrategyKind::Amp);
        assert_eq!(accepted.strategy.as_str(), "amp");
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].rejection.as_deref(), Some("too_short"));
        assert!(!report.tried(StrategyKind::Rendered));
    }

    #[tokio::test]
    async fn test_exhausted_chain_keeps_last_text() {
        let chain = ExtractionChain::new(
            vec![
                strategy(StrategyKind::Static, Some(StrategyOutcome::Rejected("consent_markup".into()))),
                strategy(StrategyKind::Amp, Some(StrategyOutcome::Rejected("no_amp_variant".into()))),
                strategy(
                    StrategyKind::Rendered,
                    Some(StrategyOutcome::Failed("render timed out".into())),
                ),
                strategy(
                    StrategyKind::GenericFallback,
                    Some(StrategyOutcome::text(crate::wall::text::TEMPLATE_EN)),
                ),
            ],
            gate(),
        );

        let report = chain.run(&context()).await;
        assert!(report.accepted.is_none());
        assert_eq!(report.attempts.len(), 4);
        assert_eq!(
            report.attempts[2].rejection.as_deref(),
            Some("extraction_exception:render timed out")
        );
        assert_eq!(report.attempts[3].rejection.as_deref(), Some("cookie_wall"));
        assert!(report.last_text().unwrap().contains("Yahoo family of brands"));
    }

    #[tokio::test]
    async fn test_static_accepted_skips_rest() {
        let chain = ExtractionChain::new(
            vec![
                strategy(StrategyKind::Static, Some(StrategyOutcome::text(words(200)))),
                strategy(StrategyKind::Amp, None),
            ],
            gate(),
        );
        let url = Url::parse("https://news.example.com/story").unwrap();
        let (text, kind) = chain.extract(&url, "<html></html>").await.unwrap();
        assert_eq!(kind, StrategyKind::Static);
        assert_eq!(text.split_whitespace().count(), 200);
    }

    #[tokio::test]
    async fn test_amp_source_url_carried() {
        let amp_url = Url::parse("https://news.example.com/story/amp").unwrap();
        let chain = ExtractionChain::new(
            vec![strategy(
                StrategyKind::Amp,
                Some(StrategyOutcome::Success {
                    text: words(150),
                    source_url: Some(amp_url.clone()),
                }),
            )],
            gate(),
        );
        let report = chain.run(&context()).await;
        assert_eq!(report.accepted.unwrap().source_url, Some(amp_url));
    }

    #[test]
    fn test_chain_order_from_config() {
        let fetcher = Fetcher::new(
            crate::fetcher::RateLimiter::new(std::time::Duration::ZERO),
            crate::fetcher::RetryPolicy::default(),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        let config = Config::default();
        let chain = ExtractionChain::from_config(&config, fetcher.clone(), None);
        assert_eq!(
            chain.kinds(),
            vec![StrategyKind::Static, StrategyKind::Amp, StrategyKind::GenericFallback]
        );

        let config = Config {
            render: true,
            ..Config::default()
        };
        let renderer: Arc<dyn PageRenderer> = Arc::new(render::MockPageRenderer::new());
        let chain = ExtractionChain::from_config(&config, fetcher, Some(renderer));
        assert_eq!(chain.kinds(), StrategyKind::ORDER.to_vec());
    }
}

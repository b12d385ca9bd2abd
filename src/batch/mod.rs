//! Batch orchestration: one row's journey through resolve, fetch and
//! extract as a unit of work, many of them at once, checkpointed.

pub mod input;
pub mod sink;

pub use input::{InputError, InputTable, WorkItem};
pub use sink::{CheckpointSink, CsvSink, SinkError};

use futures::{Stream, StreamExt};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::extractor::{
    ChainReport, EXHAUSTED_REASON, ExtractionChain, PageContext, PageRenderer, model::word_count,
};
use crate::fetcher::{
    FailureKind, FetchError, Fetcher, RateLimiter, clean_url, registrable_domain,
};
use crate::resolver::RedirectResolver;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] SinkError),

    #[error("pipeline setup failed: {0}")]
    Setup(#[from] FetchError),
}

/// Externally visible result for one row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageOutcome {
    pub key: String,
    pub final_url: Option<String>,
    pub http_status: Option<u16>,
    pub article_text: Option<String>,
    pub extractor: Option<String>,
    pub error: Option<String>,
    pub word_count: usize,
}

impl PageOutcome {
    pub fn failed(
        key: &str,
        final_url: Option<String>,
        http_status: Option<u16>,
        error: &FetchError,
    ) -> Self {
        Self {
            key: key.to_string(),
            final_url,
            http_status,
            error: Some(format!("{}:{}", error.kind(), error.reason())),
            ..Self::default()
        }
    }

    pub fn rejected(key: &str, final_url: Option<String>, http_status: Option<u16>, reason: &str) -> Self {
        Self {
            key: key.to_string(),
            final_url,
            http_status,
            error: Some(format!("{}:{reason}", FailureKind::ContentRejected)),
            ..Self::default()
        }
    }

    /// Outcome of a chain run. Rejected runs keep the last attempted text but
    /// never name an extractor.
    pub fn from_chain(key: &str, ctx: &PageContext, report: &ChainReport) -> Self {
        match &report.accepted {
            Some(extracted) => Self {
                key: key.to_string(),
                final_url: Some(
                    extracted
                        .source_url
                        .as_ref()
                        .unwrap_or(&ctx.final_url)
                        .to_string(),
                ),
                http_status: ctx.status,
                word_count: word_count(&extracted.text),
                article_text: Some(extracted.text.clone()),
                extractor: Some(extracted.strategy.as_str().to_string()),
                error: None,
            },
            None => {
                let text = report.last_text().filter(|t| !t.trim().is_empty());
                Self {
                    word_count: text.map(word_count).unwrap_or(0),
                    article_text: text.map(str::to_string),
                    ..Self::rejected(key, Some(ctx.final_url.to_string()), ctx.status, EXHAUSTED_REASON)
                }
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.extractor.is_some()
    }

    pub fn with_key(&self, key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..self.clone()
        }
    }
}

/// Per-item lifecycle, logged as the item advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Queued,
    Resolving,
    Fetching,
    Extracting,
    Accepted,
    Exhausted,
}

impl Display for ItemState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Accepted => "accepted",
            Self::Exhausted => "exhausted",
        })
    }
}

/// Registrable-domain allow and deny lists.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    allow: HashSet<String>,
    deny: HashSet<String>,
}

impl DomainFilter {
    pub fn new(allow: HashSet<String>, deny: HashSet<String>) -> Self {
        Self { allow, deny }
    }

    pub fn check(&self, domain: &str) -> Result<(), FetchError> {
        let domain = domain.to_lowercase();
        if self.deny.contains(&domain) || (!self.allow.is_empty() && !self.allow.contains(&domain)) {
            return Err(FetchError::Denylisted(domain));
        }
        Ok(())
    }

    pub fn check_url(&self, url: &Url) -> Result<(), FetchError> {
        match registrable_domain(url) {
            Some(domain) => self.check(&domain),
            None => Ok(()),
        }
    }
}

/// Everything one item needs on its way from input URL to outcome.
pub struct ItemPipeline {
    fetcher: Fetcher,
    resolver: RedirectResolver,
    chain: ExtractionChain,
    filter: DomainFilter,
    resolve: bool,
}

impl ItemPipeline {
    pub fn new(
        fetcher: Fetcher,
        resolver: RedirectResolver,
        chain: ExtractionChain,
        filter: DomainFilter,
        resolve: bool,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            chain,
            filter,
            resolve,
        }
    }

    pub fn from_config(
        config: &Config,
        renderer: Option<Arc<dyn PageRenderer>>,
    ) -> Result<Self, FetchError> {
        let limiter = RateLimiter::new(config.domain_delay);
        let fetcher = Fetcher::from_config(config, limiter)?;
        Ok(Self::new(
            fetcher.clone(),
            RedirectResolver::from_config(config, fetcher.clone()),
            ExtractionChain::from_config(config, fetcher, renderer),
            DomainFilter::new(config.domain_allowlist.clone(), config.domain_denylist.clone()),
            config.resolve,
        ))
    }

    pub fn filter(&self) -> &DomainFilter {
        &self.filter
    }

    /// Items skip resolution when they carry a canonical URL or resolution is off.
    pub fn skips_resolution(&self, item: &WorkItem) -> bool {
        item.is_canonical() || !self.resolve
    }

    pub async fn process(&self, item: WorkItem) -> PageOutcome {
        let key = item.key.as_str();
        debug!(state = %ItemState::Queued);

        let Some(input) = item.target() else {
            return PageOutcome::failed(key, None, None, &FetchError::InvalidUrl(item.source_url.clone()));
        };

        let mut prefetched = None;
        let target = if self.skips_resolution(&item) {
            input
        } else {
            debug!(state = %ItemState::Resolving);
            let resolved = self.resolver.resolve(input.as_str()).await;
            match resolved.url {
                Some(url) => {
                    prefetched = resolved.page.filter(|page| {
                        page.final_url.as_ref().map(clean_url).as_ref() == Some(&url)
                    });
                    url
                }
                None => {
                    let error = resolved
                        .error
                        .unwrap_or_else(|| FetchError::Unknown("unresolved".to_string()));
                    debug!(state = %ItemState::Exhausted, error = %error);
                    return PageOutcome::failed(key, None, resolved.status, &error);
                }
            }
        };

        if let Err(error) = self.filter.check_url(&target) {
            debug!(state = %ItemState::Exhausted, error = %error);
            return PageOutcome::failed(key, Some(target.to_string()), None, &error);
        }

        debug!(state = %ItemState::Fetching, url = %target);
        let page = match prefetched {
            Some(page) => page,
            None => self.fetcher.fetch(target.as_str()).await,
        };
        let final_url = page.final_url.clone().unwrap_or_else(|| target.clone());

        let Some(html) = page.html() else {
            debug!(state = %ItemState::Exhausted, status = ?page.status);
            return match &page.error {
                Some(error) => PageOutcome::failed(key, Some(final_url.to_string()), page.status, error),
                None => PageOutcome::rejected(key, Some(final_url.to_string()), page.status, "empty_html"),
            };
        };

        debug!(state = %ItemState::Extracting);
        let ctx = PageContext {
            requested_url: target,
            final_url,
            status: page.status,
            html: html.to_string(),
        };
        let report = self.chain.run(&ctx).await;
        let outcome = PageOutcome::from_chain(key, &ctx, &report);

        let state = if outcome.is_accepted() {
            ItemState::Accepted
        } else {
            ItemState::Exhausted
        };
        debug!(state = %state, attempts = report.attempts.len(), words = outcome.word_count);
        outcome
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub accepted: usize,
    pub exhausted: usize,
    pub skipped_resumed: usize,
    pub duplicates: usize,
    pub filtered_by_domain: usize,
    pub checkpoints: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct BatchRun {
    pub outcomes: HashMap<String, PageOutcome>,
    pub report: BatchReport,
}

pub struct BatchOrchestrator {
    pipeline: Arc<ItemPipeline>,
    concurrency: usize,
    checkpoint_every: usize,
    run_id: Uuid,
}

impl BatchOrchestrator {
    pub fn new(pipeline: ItemPipeline, concurrency: usize, checkpoint_every: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            concurrency: concurrency.max(1),
            checkpoint_every: checkpoint_every.max(1),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn from_config(
        config: &Config,
        renderer: Option<Arc<dyn PageRenderer>>,
    ) -> Result<Self, BatchError> {
        Ok(Self::new(
            ItemPipeline::from_config(config, renderer)?,
            config.concurrency,
            config.checkpoint_every,
        ))
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Process `items` with at most `concurrency` in flight, yielding
    /// outcomes in completion order. Cancelling `cancel` stops new work and
    /// abandons in-flight items; the stream then ends. Dropping the stream
    /// has the same effect.
    pub fn stream(
        &self,
        items: Vec<WorkItem>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = PageOutcome> + Send + 'static {
        let (tx, rx) = mpsc::channel(self.concurrency * 2);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let pipeline = self.pipeline.clone();

        tokio::spawn(
            async move {
                for item in items {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tx.closed() => break,
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let tx = tx.clone();
                    let pipeline = pipeline.clone();
                    let cancel = cancel.clone();
                    let span = info_span!("item", key = %item.key);
                    tokio::spawn(
                        async move {
                            let _permit = permit;
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => debug!("item abandoned"),
                                _ = tx.closed() => debug!("outcome receiver dropped, item abandoned"),
                                outcome = pipeline.process(item) => {
                                    if tx.send(outcome).await.is_err() {
                                        warn!("outcome receiver dropped");
                                    }
                                }
                            }
                        }
                        .instrument(span),
                    );
                }
            }
            .in_current_span(),
        );

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|outcome| (outcome, rx))
        })
    }

    /// Run a whole batch and persist it to `sink`.
    ///
    /// Keys in `previous` that were accepted are carried forward untouched.
    /// Items sharing a normalized target URL are processed once. The sink
    /// receives the full result set every `checkpoint_every` completions and
    /// once more at the end; a sink failure aborts the run.
    #[instrument(skip_all, fields(run_id = %self.run_id, items = items.len()))]
    pub async fn run(
        &self,
        items: Vec<WorkItem>,
        previous: HashMap<String, PageOutcome>,
        sink: &dyn CheckpointSink,
        cancel: CancellationToken,
    ) -> Result<BatchRun, BatchError> {
        let mut report = BatchReport {
            total: items.len(),
            ..BatchReport::default()
        };
        let mut outcomes = HashMap::new();
        let mut primaries: HashMap<String, String> = HashMap::new();
        let mut duplicates: HashMap<String, Vec<String>> = HashMap::new();
        let mut queue = Vec::new();

        for item in items {
            if let Some(done) = previous.get(&item.key).filter(|o| o.is_accepted()) {
                outcomes.insert(item.key.clone(), done.with_key(&item.key));
                report.skipped_resumed += 1;
                continue;
            }

            let Some(target) = item.target() else {
                let error = FetchError::InvalidUrl(item.source_url.clone());
                outcomes.insert(item.key.clone(), PageOutcome::failed(&item.key, None, None, &error));
                continue;
            };

            if self.pipeline.skips_resolution(&item)
                && let Err(error) = self.pipeline.filter().check_url(&target)
            {
                outcomes.insert(
                    item.key.clone(),
                    PageOutcome::failed(&item.key, Some(target.to_string()), None, &error),
                );
                report.filtered_by_domain += 1;
                continue;
            }

            match primaries.entry(target.to_string()) {
                Entry::Occupied(primary) => {
                    duplicates
                        .entry(primary.get().clone())
                        .or_default()
                        .push(item.key.clone());
                    report.duplicates += 1;
                }
                Entry::Vacant(slot) => {
                    slot.insert(item.key.clone());
                    queue.push(item);
                }
            }
        }

        info!(
            queued = queue.len(),
            resumed = report.skipped_resumed,
            duplicates = report.duplicates,
            filtered = report.filtered_by_domain,
            concurrency = self.concurrency,
            "starting batch"
        );

        // Any early return below cancels the stream's spawned work.
        let stream_cancel = cancel.child_token();
        let _stream_guard = stream_cancel.clone().drop_guard();

        let mut completed = 0usize;
        let mut stream = pin!(self.stream(queue, stream_cancel));
        while let Some(outcome) = stream.next().await {
            if let Some(keys) = duplicates.get(&outcome.key) {
                for key in keys {
                    outcomes.insert(key.clone(), outcome.with_key(key));
                }
            }
            outcomes.insert(outcome.key.clone(), outcome);

            completed += 1;
            if completed % self.checkpoint_every == 0 {
                sink.persist(&outcomes).await?;
                report.checkpoints += 1;
                info!(completed, "checkpoint");
            }
        }

        report.cancelled = cancel.is_cancelled();
        sink.persist(&outcomes).await?;
        report.checkpoints += 1;

        report.accepted = outcomes.values().filter(|o| o.is_accepted()).count();
        report.exhausted = outcomes.len() - report.accepted;
        info!(?report, "batch finished");

        Ok(BatchRun { outcomes, report })
    }
}

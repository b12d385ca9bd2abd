use rand::seq::SliceRandom;
use reqwest::{
    Client, ClientBuilder, Response,
    header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::fetcher::{
    backoff::RetryPolicy,
    domain::registrable_domain,
    errors::FetchError,
    pipeline::decode_body,
    rate_limit::RateLimiter,
    types::{Charset, FetchResult},
};

const MAX_BODY_SIZE: u64 = 5 * 1024 * 1024; // 5MB
const MAX_REDIRECTS: usize = 10;

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.7,es;q=0.6", "en-GB,en;q=0.8,es;q=0.5"];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub(crate) fn rotating_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(
            ACCEPT_LANGUAGES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(ACCEPT_LANGUAGES[0]),
        ),
    );
    headers
}

fn build_client(request_timeout: Duration) -> Result<Client, FetchError> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );

    ClientBuilder::new()
        .connect_timeout(request_timeout.min(Duration::from_secs(10)))
        .timeout(request_timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .default_headers(default_headers)
        .build()
        .map_err(|e| FetchError::Unknown(format!("failed to build HTTP client: {e}")))
}

/// Outcome of a single attempt, before the retry loop decides what to do.
enum Attempt {
    Done(FetchResult),
    Retry {
        error: FetchError,
        final_url: Option<Url>,
    },
}

/// Retrying HTTP client. Every attempt passes through the shared
/// [`RateLimiter`] for the target's registrable domain.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(
        limiter: RateLimiter,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(request_timeout)?,
            limiter,
            policy,
        })
    }

    pub fn from_config(config: &Config, limiter: RateLimiter) -> Result<Self, FetchError> {
        let policy = RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: config.backoff_base,
            multiplier: config.backoff_multiplier,
        };
        Self::new(limiter, policy, config.request_timeout)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// GET `url` using the configured attempt cap.
    pub async fn fetch(&self, url: &str) -> FetchResult {
        self.fetch_with_attempts(url, self.policy.max_attempts).await
    }

    #[instrument(skip_all, fields(url = %url, max_attempts = max_attempts))]
    pub async fn fetch_with_attempts(&self, url: &str, max_attempts: u32) -> FetchResult {
        let parsed = match parse_http_url(url) {
            Ok(parsed) => parsed,
            Err(e) => return FetchResult::failure(url, None, None, e, 0),
        };
        let domain = registrable_domain(&parsed).unwrap_or_default();
        let max_attempts = max_attempts.max(1);

        let mut last_error = FetchError::Unknown("no attempt made".to_string());
        let mut last_final_url = None;

        for attempt in 1..=max_attempts {
            self.limiter.acquire(&domain).await;

            match self.attempt(url, &parsed, attempt).await {
                Attempt::Done(result) => return result,
                Attempt::Retry { error, final_url } => {
                    warn!(attempt, max_attempts, error = %error, "fetch attempt failed");
                    last_error = error;
                    last_final_url = final_url.or(last_final_url);
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt - 1);
                debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        FetchResult::failure(url, last_final_url, None, last_error, max_attempts)
    }

    async fn attempt(&self, requested: &str, url: &Url, attempt: u32) -> Attempt {
        let response = match self
            .client
            .get(url.clone())
            .headers(rotating_headers())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let error = FetchError::from_reqwest_error(e);
                if error.should_retry() {
                    return Attempt::Retry {
                        error,
                        final_url: None,
                    };
                }
                return Attempt::Done(FetchResult::failure(requested, None, None, error, attempt));
            }
        };

        let final_url = response.url().clone();
        let status = response.status().as_u16();

        if status == 429 || response.status().is_server_error() {
            return Attempt::Retry {
                error: FetchError::Http { status },
                final_url: Some(final_url),
            };
        }

        if status >= 400 {
            return Attempt::Done(FetchResult::failure(
                requested,
                Some(final_url),
                Some(status),
                FetchError::Http { status },
                attempt,
            ));
        }

        match read_body(response).await {
            Ok((body, charset)) => Attempt::Done(FetchResult::success(
                requested, final_url, status, body, charset, attempt,
            )),
            Err(error) if error.should_retry() => Attempt::Retry {
                error,
                final_url: Some(final_url),
            },
            Err(error) => Attempt::Done(FetchResult::failure(
                requested,
                Some(final_url),
                Some(status),
                error,
                attempt,
            )),
        }
    }
}

pub fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url.trim())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

async fn read_body(response: Response) -> Result<(String, Charset), FetchError> {
    // Check content length before downloading
    if let Some(content_length) = response.content_length()
        && content_length > MAX_BODY_SIZE
    {
        return Err(FetchError::BodyTooLarge(content_length));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .unwrap_or("text/html")
        .to_string();

    let body_bytes = response
        .bytes()
        .await
        .map_err(FetchError::from_reqwest_error)?;

    // Content-Length may be missing
    if body_bytes.len() as u64 > MAX_BODY_SIZE {
        return Err(FetchError::BodyTooLarge(body_bytes.len() as u64));
    }

    Ok(decode_body(&content_type, &body_bytes))
}

//! Configuration handling for a harvesting run.
//!
//! Every knob has a development default so a bare `gleaner` invocation works
//! against `data/input.csv`. `Config::from_env` overlays environment variables
//! on top of those defaults and validates the numeric ones.

use std::collections::HashSet;
use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable names.
pub const ENV_INPUT: &str = "GLEANER_INPUT";
pub const ENV_OUTPUT: &str = "GLEANER_OUTPUT";
pub const ENV_CONCURRENCY: &str = "GLEANER_CONCURRENCY";
pub const ENV_DOMAIN_DELAY_MS: &str = "GLEANER_DOMAIN_DELAY_MS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "GLEANER_REQUEST_TIMEOUT_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "GLEANER_MAX_ATTEMPTS";
pub const ENV_BACKOFF_BASE_MS: &str = "GLEANER_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_MULTIPLIER: &str = "GLEANER_BACKOFF_MULTIPLIER";
pub const ENV_MIN_WORDS: &str = "GLEANER_MIN_WORDS";
pub const ENV_CHECKPOINT_EVERY: &str = "GLEANER_CHECKPOINT_EVERY";
pub const ENV_DOMAIN_ALLOWLIST: &str = "GLEANER_DOMAIN_ALLOWLIST";
pub const ENV_DOMAIN_DENYLIST: &str = "GLEANER_DOMAIN_DENYLIST";
pub const ENV_RENDER: &str = "GLEANER_RENDER";
pub const ENV_RENDER_CONCURRENCY: &str = "GLEANER_RENDER_CONCURRENCY";
pub const ENV_RENDER_TIMEOUT_SECS: &str = "GLEANER_RENDER_TIMEOUT_SECS";
pub const ENV_RESOLVE: &str = "GLEANER_RESOLVE";
pub const ENV_RESUME: &str = "GLEANER_RESUME";
pub const ENV_KEY_COLUMN: &str = "GLEANER_KEY_COLUMN";
pub const ENV_ARTIFACT_PHRASES: &str = "GLEANER_ARTIFACT_PHRASES";
pub const ENV_TRACKING_MARKERS: &str = "GLEANER_TRACKING_MARKERS";
pub const ENV_AMP_DOMAINS: &str = "GLEANER_AMP_DOMAINS";

const DEFAULT_INPUT: &str = "data/input.csv";
const DEFAULT_OUTPUT: &str = "data/output.csv";
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_DOMAIN_DELAY_MS: u64 = 600;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 25;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 800;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.8;
const DEFAULT_MIN_WORDS: usize = 120;
const DEFAULT_CHECKPOINT_EVERY: usize = 200;
const DEFAULT_RENDER_CONCURRENCY: usize = 4;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 12;

/// Hard paywalls that never yield article text.
pub const DEFAULT_DENYLIST: &[&str] = &["bloomberg.com", "ft.com", "wsj.com"];

/// Fragments that show up in pages where extraction latched onto chrome
/// (footers, portfolio widgets, video teasers) instead of the article body.
pub const DEFAULT_ARTIFACT_PHRASES: &[&str] = &[
    "oops, something went wrong",
    "all rights reserved.",
    "terms and privacy policy",
    "my portfolio",
    "watch now",
    "min read",
    "scott lehtonen",
    "patrick seitz",
];

/// Substrings marking a canonical URL as a tracking or redirect artifact.
pub const DEFAULT_TRACKING_MARKERS: &[&str] = &[
    "utm_",
    "fbclid=",
    "ref=",
    "/rss",
    "feedproxy",
    "news.google.",
    "flipboard.com",
    "msn.com/",
    "finnhub.io",
];

/// Hosts where the plain `/amp` suffix 404s but `/amphtml/<path>` works.
pub const DEFAULT_AMP_DOMAINS: &[&str] = &[
    "finance.yahoo.com",
    "uk.finance.yahoo.com",
    "news.yahoo.com",
];

/// Runtime configuration for a harvesting run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub concurrency: usize,
    pub domain_delay: Duration,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub min_words: usize,
    pub checkpoint_every: usize,
    pub domain_allowlist: HashSet<String>,
    pub domain_denylist: HashSet<String>,
    pub render: bool,
    pub render_concurrency: usize,
    pub render_timeout: Duration,
    pub resolve: bool,
    pub resume: bool,
    pub key_column: Option<String>,
    pub artifact_phrases: Vec<String>,
    pub tracking_markers: Vec<String>,
    pub amp_domains: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(DEFAULT_INPUT),
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            concurrency: DEFAULT_CONCURRENCY,
            domain_delay: Duration::from_millis(DEFAULT_DOMAIN_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            min_words: DEFAULT_MIN_WORDS,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            domain_allowlist: HashSet::new(),
            domain_denylist: to_set(DEFAULT_DENYLIST),
            render: false,
            render_concurrency: DEFAULT_RENDER_CONCURRENCY,
            render_timeout: Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECS),
            resolve: true,
            resume: false,
            key_column: None,
            artifact_phrases: to_vec(DEFAULT_ARTIFACT_PHRASES),
            tracking_markers: to_vec(DEFAULT_TRACKING_MARKERS),
            amp_domains: to_set(DEFAULT_AMP_DOMAINS),
        }
    }
}

impl Config {
    /// Load from environment variables, falling back to development defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            input_path: env::var(ENV_INPUT)
                .map(PathBuf::from)
                .unwrap_or(defaults.input_path),
            output_path: env::var(ENV_OUTPUT)
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            concurrency: parse_var(ENV_CONCURRENCY, "concurrency")?
                .unwrap_or(defaults.concurrency),
            domain_delay: parse_var(ENV_DOMAIN_DELAY_MS, "domain_delay")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.domain_delay),
            request_timeout: parse_var(ENV_REQUEST_TIMEOUT_SECS, "request_timeout")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_attempts: parse_var(ENV_MAX_ATTEMPTS, "max_attempts")?
                .unwrap_or(defaults.max_attempts),
            backoff_base: parse_var(ENV_BACKOFF_BASE_MS, "backoff_base")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_multiplier: parse_var(ENV_BACKOFF_MULTIPLIER, "backoff_multiplier")?
                .unwrap_or(defaults.backoff_multiplier),
            min_words: parse_var(ENV_MIN_WORDS, "min_words")?.unwrap_or(defaults.min_words),
            checkpoint_every: parse_var(ENV_CHECKPOINT_EVERY, "checkpoint_every")?
                .unwrap_or(defaults.checkpoint_every),
            domain_allowlist: list_var(ENV_DOMAIN_ALLOWLIST)
                .map(|v| v.into_iter().collect())
                .unwrap_or(defaults.domain_allowlist),
            domain_denylist: list_var(ENV_DOMAIN_DENYLIST)
                .map(|v| v.into_iter().collect())
                .unwrap_or(defaults.domain_denylist),
            render: bool_var(ENV_RENDER, "render")?.unwrap_or(defaults.render),
            render_concurrency: parse_var(ENV_RENDER_CONCURRENCY, "render_concurrency")?
                .unwrap_or(defaults.render_concurrency),
            render_timeout: parse_var(ENV_RENDER_TIMEOUT_SECS, "render_timeout")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.render_timeout),
            resolve: bool_var(ENV_RESOLVE, "resolve")?.unwrap_or(defaults.resolve),
            resume: bool_var(ENV_RESUME, "resume")?.unwrap_or(defaults.resume),
            key_column: env::var(ENV_KEY_COLUMN)
                .ok()
                .filter(|v| !v.trim().is_empty()),
            artifact_phrases: list_var(ENV_ARTIFACT_PHRASES).unwrap_or(defaults.artifact_phrases),
            tracking_markers: list_var(ENV_TRACKING_MARKERS).unwrap_or(defaults.tracking_markers),
            amp_domains: list_var(ENV_AMP_DOMAINS)
                .map(|v| v.into_iter().collect())
                .unwrap_or(defaults.amp_domains),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::invalid("checkpoint_every", "must be at least 1"));
        }
        if self.render_concurrency == 0 {
            return Err(ConfigError::invalid(
                "render_concurrency",
                "must be at least 1",
            ));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::invalid(
                "backoff_multiplier",
                "must be a number >= 1.0",
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    key: &str,
    field: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(field, format!("{raw:?}: {e}"))),
        _ => Ok(None),
    }
}

fn bool_var(key: &str, field: &'static str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::invalid(
                field,
                format!("{other:?} is not a boolean"),
            )),
        },
        Err(_) => Ok(None),
    }
}

/// Comma-separated list; an explicitly empty variable yields an empty list.
fn list_var(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn to_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn to_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Errors that can occur while building a configuration.
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl Error for ConfigError {}

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;
use url::Url;

/// Extraction strategies in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Static,
    Amp,
    Rendered,
    GenericFallback,
}

impl StrategyKind {
    pub const ORDER: [StrategyKind; 4] = [
        StrategyKind::Static,
        StrategyKind::Amp,
        StrategyKind::Rendered,
        StrategyKind::GenericFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Amp => "amp",
            Self::Rendered => "rendered",
            Self::GenericFallback => "generic-fallback",
        }
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The page an item's chain works on.
#[derive(Debug, Clone)]
pub struct PageContext {
    /// URL the item asked for (after resolution).
    pub requested_url: Url,
    /// URL the fetch ended on.
    pub final_url: Url,
    pub status: Option<u16>,
    pub html: String,
}

/// What a single strategy produced, before the quality gate.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// Candidate text, plus the URL it came from when that differs from the page.
    Success { text: String, source_url: Option<Url> },
    /// The strategy ran but had nothing usable (no AMP link, consent markup, ...).
    Rejected(String),
    /// Parser, renderer or network failure inside the strategy.
    Failed(String),
}

impl StrategyOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Success {
            text: text.into(),
            source_url: None,
        }
    }
}

/// Diagnostic record of one strategy run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionAttempt {
    pub strategy: StrategyKind,
    pub text: Option<String>,
    pub accepted: bool,
    pub rejection: Option<String>,
}

/// Accepted text and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub strategy: StrategyKind,
    pub source_url: Option<Url>,
}

/// Full result of running the chain on one page.
#[derive(Debug, Clone, Default)]
pub struct ChainReport {
    pub accepted: Option<Extracted>,
    pub attempts: Vec<ExtractionAttempt>,
}

impl ChainReport {
    /// Text of the last strategy that produced any, accepted or not.
    pub fn last_text(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| a.text.as_deref())
    }

    pub fn tried(&self, strategy: StrategyKind) -> bool {
        self.attempts.iter().any(|a| a.strategy == strategy)
    }
}

static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static SPACE_BEFORE_NEWLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]*\n").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());

pub fn normalize_whitespace(text: &str) -> String {
    let text = text.trim();

    // Replace multiple spaces/tabs with single space
    let spaced = SPACES.replace_all(text, " ");
    let spaced = SPACE_BEFORE_NEWLINE.replace_all(&spaced, "\n");

    // Convert multiple consecutive newlines to double newlines
    BLANK_RUNS.replace_all(&spaced, "\n\n").to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

//! Acceptance gate applied to every strategy's candidate text.

use std::fmt::{Display, Formatter};

use crate::config::Config;
use crate::extractor::model::word_count;
use crate::wall::{WallDetector, WallReason};

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Empty,
    TooShort { words: usize, min_words: usize },
    Wall(WallReason),
    Artifact(String),
}

impl Rejection {
    /// Stable reason string recorded on the attempt.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooShort { .. } => "too_short",
            Self::Wall(_) => "cookie_wall",
            Self::Artifact(_) => "artifact",
        }
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty text"),
            Self::TooShort { words, min_words } => write!(f, "{words} words, need {min_words}"),
            Self::Wall(reason) => write!(f, "{reason}"),
            Self::Artifact(phrase) => write!(f, "artifact phrase \"{phrase}\""),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    min_words: usize,
    artifact_phrases: Vec<String>,
    detector: WallDetector,
}

impl QualityGate {
    pub fn new(min_words: usize, artifact_phrases: Vec<String>) -> Self {
        Self {
            min_words,
            artifact_phrases: artifact_phrases
                .into_iter()
                .map(|p| p.to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            detector: WallDetector::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.min_words, config.artifact_phrases.clone())
    }

    pub fn min_words(&self) -> usize {
        self.min_words
    }

    /// Accept or reject `text`. Accepted text comes back with consent
    /// paragraphs stripped; the word minimum applies to that stripped text
    /// and the artifact check to the original.
    pub fn check(&self, text: &str) -> Result<String, Rejection> {
        if text.trim().is_empty() {
            return Err(Rejection::Empty);
        }

        let verdict = self.detector.classify(None, Some(text));
        if verdict.is_wall {
            let reason = verdict.reason.unwrap_or(WallReason::Boilerplate {
                removed_ratio: verdict.removed_ratio.unwrap_or(0.0),
            });
            return Err(Rejection::Wall(reason));
        }
        let candidate = verdict.stripped_text.unwrap_or_else(|| text.to_string());

        let words = word_count(&candidate);
        if words < self.min_words {
            return Err(Rejection::TooShort {
                words,
                min_words: self.min_words,
            });
        }

        // Artifacts count anywhere in the text, stripped paragraphs included.
        let lower = text.to_lowercase();
        if let Some(phrase) = self.artifact_phrases.iter().find(|p| lower.contains(p.as_str())) {
            return Err(Rejection::Artifact(phrase.clone()));
        }

        Ok(candidate)
    }

    pub fn accepts(&self, text: &str) -> bool {
        self.check(text).is_ok()
    }
}

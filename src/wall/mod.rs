//! Consent/cookie-wall and boilerplate detection.
//!
//! Two independent detectors are composed here:
//!
//! - [`markers`]: substring scan of raw HTML for consent-management markup.
//! - [`text`] and [`paragraphs`]: rules over extracted text (template
//!   similarity, keyword score, short-document heuristic) plus
//!   paragraph-level stripping of consent boilerplate.
//!
//! `WallDetector::classify` never fails; absent or empty input is "not a wall".

pub mod markers;
pub mod paragraphs;
pub mod text;

use std::fmt::{Display, Formatter};

pub use paragraphs::Stripped;
pub use text::TextSignal;

/// Why a document was flagged.
#[derive(Debug, Clone, PartialEq)]
pub enum WallReason {
    HtmlMarker(&'static str),
    Text(TextSignal),
    Boilerplate { removed_ratio: f64 },
}

impl Display for WallReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HtmlMarker(marker) => write!(f, "consent markup ({marker})"),
            Self::Text(TextSignal::TemplateMatch(score)) => {
                write!(f, "consent template match ({score:.2})")
            }
            Self::Text(TextSignal::KeywordScore(hits)) => {
                write!(f, "consent keywords ({hits} hits)")
            }
            Self::Text(TextSignal::ShortDocument(hits)) => {
                write!(f, "short consent document ({hits} hits)")
            }
            Self::Boilerplate { removed_ratio } => {
                write!(f, "consent boilerplate ({:.0}% removed)", removed_ratio * 100.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WallVerdict {
    pub is_wall: bool,
    pub reason: Option<WallReason>,
    pub stripped_text: Option<String>,
    pub removed_ratio: Option<f64>,
}

impl WallVerdict {
    fn wall(reason: WallReason) -> Self {
        Self {
            is_wall: true,
            reason: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WallDetector;

impl WallDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify raw HTML, extracted text, or both.
    ///
    /// The HTML check is pure containment and runs first; text rules run only
    /// when the markup is clean. Paragraph stripping always runs on non-empty
    /// text so callers receive `stripped_text`/`removed_ratio` even for
    /// accepted documents.
    pub fn classify(&self, html: Option<&str>, text: Option<&str>) -> WallVerdict {
        if let Some(marker) = html.and_then(markers::find_marker) {
            return WallVerdict::wall(WallReason::HtmlMarker(marker));
        }

        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return WallVerdict::default();
        };

        let stripped = paragraphs::strip(text);
        let reason = text::detect(text).map(WallReason::Text).or_else(|| {
            stripped.flagged.then_some(WallReason::Boilerplate {
                removed_ratio: stripped.removed_ratio,
            })
        });

        WallVerdict {
            is_wall: reason.is_some(),
            reason,
            stripped_text: Some(stripped.text),
            removed_ratio: Some(stripped.removed_ratio),
        }
    }
}

//! Paragraph-level consent boilerplate stripping.

use html_escape::decode_html_entities;
use regex::Regex;
use std::sync::LazyLock;

/// Removed-character fraction above which the whole document is a wall.
pub const MAX_REMOVED_RATIO: f64 = 0.15;
/// When "cookie" appears, the stripped text must keep this much of the original.
pub const MIN_KEPT_RATIO: f64 = 0.75;

const CONSENT_PATTERNS: &[&str] = &[
    r"\busamos\s+cookies\b",
    r"\bcuando\s+utilizas?\s+nuestros?\s+sitios?.*cookies",
    r"\bgestionar\s+configuraci[oó]n\s+de\s+privacidad\b",
    r"\brevocar\s+tu\s+consentimiento\b",
    r"\bmarco\s+de\s+transparencia\s+y\s+consentimiento\s+de\s+iab\b",
    r"\baceptar\s+todo\b|\brechazar\s+todo\b|\bconfigurar\s+cookies\b",
    r"\bpol[ií]tica\s+de\s+cookies?\b|\bpol[ií]tica\s+de\s+privacidad\b",
    r"\bwe\s+use\s+cookies\b|\byour\s+privacy\s+choices\b|\bmanage\s+preferences\b|\bprivacy\s+preferences\b",
    r"\bconsent\s+(preferences|choices|manager)\b",
    r"\bone\s*trust\b|\bquantcast\b|\btrustarc\b|\bdidomi\b|\bsourcepoint\b",
    r"\baccept\s+all\s+cookies\b|\breject\s+all\s+cookies\b",
    r"\byahoo\s+is\s+part\s+of\s+the\s+yahoo\s+family\s+of\s+brands\b",
    r"\biab\s+transparency\s*&\s*consent\s*framework\b",
];

static CONSENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("(?is){}", CONSENT_PATTERNS.join("|"))).unwrap());

static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}|\r{2,}|(?:\r\n){2,}").unwrap());

static SENTENCE_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s{2,}").unwrap());

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\r\n|\n|\r").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct Stripped {
    pub text: String,
    pub removed_ratio: f64,
    /// Whole-document verdict from the removed/kept ratios.
    pub flagged: bool,
}

/// Split on blank lines or on runs of spaces after sentence punctuation,
/// falling back to single line breaks when neither occurs.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    for block in BLANK_LINES.split(text) {
        let mut start = 0;
        for gap in SENTENCE_GAP.find_iter(block) {
            // keep the punctuation with the sentence it ends
            let cut = gap.start() + 1;
            paragraphs.push(&block[start..cut]);
            start = gap.end();
        }
        paragraphs.push(&block[start..]);
    }

    if paragraphs.len() <= 1 {
        return LINE_BREAK.split(text).collect();
    }
    paragraphs
}

pub fn is_consent_paragraph(paragraph: &str) -> bool {
    CONSENT_RE.is_match(paragraph)
}

/// Entities left over from extraction, with non-breaking spaces as plain ones.
fn decode_entities(text: &str) -> String {
    decode_html_entities(text).replace('\u{a0}', " ")
}

/// Drop consent paragraphs and report how much of the text they made up.
/// Entities are decoded first, so the returned text is decoded too.
pub fn strip(text: &str) -> Stripped {
    let decoded = decode_entities(text);
    let text = decoded.as_str();
    if text.trim().is_empty() {
        return Stripped {
            text: text.to_string(),
            removed_ratio: 0.0,
            flagged: false,
        };
    }

    let paragraphs = split_paragraphs(text);
    let total: usize = paragraphs.iter().map(|p| p.len()).sum::<usize>().max(1);

    let mut removed = 0usize;
    let mut kept = Vec::new();
    for paragraph in paragraphs {
        if is_consent_paragraph(paragraph) {
            removed += paragraph.len();
        } else if !paragraph.trim().is_empty() {
            kept.push(paragraph.trim());
        }
    }

    let cleaned = kept.join("\n\n");
    let removed_ratio = removed as f64 / total as f64;
    let mentions_cookie = text.to_lowercase().contains("cookie");
    let flagged = removed_ratio > MAX_REMOVED_RATIO
        || (mentions_cookie && (cleaned.len() as f64) < MIN_KEPT_RATIO * text.len() as f64);

    Stripped {
        text: if cleaned.is_empty() {
            text.to_string()
        } else {
            cleaned
        },
        removed_ratio,
        flagged,
    }
}

use readability::extractor;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

use crate::extractor::model::normalize_whitespace;

/// Elements whose paragraphs are page chrome rather than article body.
const BOILERPLATE_TAGS: &[&str] = &["nav", "header", "footer", "aside", "form", "noscript", "script", "style"];

const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    ".content",
    ".post",
    ".article",
    "#content",
    "#main",
    ".entry-content",
];

/// Readability main-content extraction. `None` when readability fails or
/// finds no text.
pub fn readability_extract(html: &str, url: &Url) -> Option<String> {
    let article = extractor::extract(&mut html.as_bytes(), url).ok()?;
    let text = normalize_whitespace(&article.text);
    (!text.is_empty()).then_some(text)
}

/// Readability first, whole-page heuristics second.
pub fn extract(html: &str, url: &Url) -> Option<String> {
    readability_extract(html, url).or_else(|| generic_extract(html))
}

/// Whole-page article extraction: the largest block of sibling paragraphs,
/// falling back to well-known content containers.
pub fn generic_extract(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let text = largest_text_block(&document).or_else(|| main_content_text(&document))?;
    let text = normalize_whitespace(&text);
    (!text.is_empty()).then_some(text)
}

fn inside_boilerplate(element: &ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|el| BOILERPLATE_TAGS.contains(&el.name()))
            .unwrap_or(false)
    })
}

/// Group `<p>` elements by parent and keep the group with the most text.
fn largest_text_block(document: &Html) -> Option<String> {
    let selector = Selector::parse("p").ok()?;
    let mut blocks = HashMap::new();

    for paragraph in document.select(&selector) {
        if inside_boilerplate(&paragraph) {
            continue;
        }
        let text = paragraph.text().collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let Some(parent) = paragraph.parent() else {
            continue;
        };
        blocks
            .entry(parent.id())
            .or_insert_with(Vec::new)
            .push(text.to_string());
    }

    blocks
        .into_values()
        .max_by_key(|paragraphs: &Vec<String>| paragraphs.iter().map(String::len).sum::<usize>())
        .map(|paragraphs| paragraphs.join("\n\n"))
}

fn main_content_text(document: &Html) -> Option<String> {
    for selector_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element in document.select(&selector) {
                let text = element.text().collect::<Vec<_>>().join(" ");
                if text.trim().len() > 100 {
                    return Some(text);
                }
            }
        }
    }

    // Last resort: the whole body
    let body_selector = Selector::parse("body").ok()?;
    let body = document.select(&body_selector).next()?;
    Some(body.text().collect::<Vec<_>>().join(" "))
}

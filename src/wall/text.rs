//! Consent-wall detection on extracted text.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Similarity at or above which text is considered a copy of a banner template.
pub const FUZZY_THRESHOLD: f64 = 0.60;
const MIN_KEYWORD_HITS: usize = 3;
const SHORT_DOC_HITS: usize = 2;
const SHORT_DOC_MAX_WORDS: usize = 600;
const SHORT_DOC_PREFIX_CHARS: usize = 300;

/// Spanish consent interstitial as served to EU visitors of Yahoo properties.
pub const TEMPLATE_ES: &str = "Cuando utilizas nuestros sitios y aplicaciones, usamos cookies para:
- proporcionarte nuestros sitios y aplicaciones;
- autenticar usuarios, aplicar medidas de seguridad y evitar el spam y los abusos, y
- medir su uso de nuestros sitios y aplicaciones
Si haces clic en «Aceptar todo», nosotros y nuestros socios, incluidos los 237 que son parte del Marco de transparencia y consentimiento de IAB, también almacenaremos o guardaremos información en un dispositivo (en otras palabras, usaremos cookies) y utilizaremos datos de geolocalización y otros tipo de datos precisos, como direcciones IP, y datos de navegación y de búsquedas, con el fin de efectuar análisis, mostrar anuncios y contenidos personalizados, medir la publicidad y el contenido, realizar investigaciones de públicos y desarrollar servicios.
Si no quieres que nosotros ni nuestros socios utilicemos cookies y datos personales para estos propósitos adicionales, haz clic en «Rechazar todo».
Si quieres personalizar tus opciones, haz clic en «Gestionar configuración de privacidad».
Puedes revocar tu consentimiento o cambiar tus opciones en cualquier momento haciendo clic en el enlace «Configuración de privacidad y cookies» o «Panel de privacidad» de nuestros sitios y aplicaciones. Para obtener más información sobre cómo utilizamos tus datos personales, consulta nuestra Política de privacidad y la Política de cookies.";

/// The same interstitial in English.
pub const TEMPLATE_EN: &str = "Yahoo is part of the Yahoo family of brands.
When you use our sites and apps, we use cookies to:
- provide our sites and apps to you;
- authenticate users, apply security measures, and prevent spam and abuse, and
- measure your use of our sites and apps
If you click «Accept all», we and our partners, including 237 who are part of the IAB Transparency & Consent Framework, will also store and/or access information on a device (in other words, use cookies) and use precise geolocation data and other personal data such as IP address and browsing and search data, for personalised advertising and content, advertising and content measurement, audience research and services development.
If you do not want us and our partners to use cookies and personal data for these additional purposes, click «Reject all».
If you would like to customise your choices, click «Manage privacy settings».
You can withdraw your consent or change your choices at any time by clicking on the «Privacy & cookie settings» or «Privacy dashboard» links on our sites and apps. Find out more about how we use your personal data in our privacy policy and cookie policy.";

/// Normalized phrases counted towards the keyword score (ES + EN).
pub const KEYWORDS: &[&str] = &[
    // es
    "usamos cookies",
    "utilizamos cookies",
    "politica de cookies",
    "politica de privacidad",
    "aceptar todo",
    "rechazar todo",
    "gestionar configuracion de privacidad",
    "panel de privacidad",
    "configuracion de privacidad y cookies",
    "marco de transparencia y consentimiento",
    // en
    "we use cookies",
    "cookie policy",
    "privacy policy",
    "accept all",
    "reject all",
    "manage privacy settings",
    "privacy dashboard",
    "privacy cookie settings",
    "iab transparency consent framework",
];

const COOKIE_TERMS: &[&str] = &["cookie"];
const ACTION_TERMS: &[&str] = &["accept all", "reject all", "aceptar todo", "rechazar todo"];
const PRIVACY_TERMS: &[&str] = &["privacy", "privacidad"];
const PREFIX_TERMS: &[&str] = &["cookie", "privac"];

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static NORMALIZED_TEMPLATES: LazyLock<Vec<String>> =
    LazyLock::new(|| vec![normalize(TEMPLATE_ES), normalize(TEMPLATE_EN)]);

/// Which text rule flagged a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextSignal {
    TemplateMatch(f64),
    KeywordScore(usize),
    ShortDocument(usize),
}

/// Strip diacritics, lowercase, replace punctuation with spaces and collapse
/// whitespace.
pub fn normalize(text: &str) -> String {
    let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let lower = stripped.to_lowercase();
    let words_only = NON_WORD.replace_all(&lower, " ");
    WHITESPACE.replace_all(&words_only, " ").trim().to_string()
}

/// Edit-distance similarity in `[0, 1]`.
///
/// Returns 0 without computing the distance when the length ratio alone
/// rules out reaching `FUZZY_THRESHOLD`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (la, lb) = (a.chars().count(), b.chars().count());
    let longest = la.max(lb);
    if longest == 0 {
        return 1.0;
    }
    let upper_bound = la.min(lb) as f64 / longest as f64;
    if upper_bound < FUZZY_THRESHOLD {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
}

pub fn best_template_similarity(normalized: &str) -> f64 {
    NORMALIZED_TEMPLATES
        .iter()
        .map(|template| similarity(template, normalized))
        .fold(0.0, f64::max)
}

/// Number of distinct keyword phrases present.
pub fn keyword_hits(normalized: &str) -> usize {
    KEYWORDS.iter().filter(|kw| normalized.contains(*kw)).count()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Run the template, keyword and short-document rules in that order.
pub fn detect(text: &str) -> Option<TextSignal> {
    if text.trim().is_empty() {
        return None;
    }
    let norm = normalize(text);

    let score = best_template_similarity(&norm);
    if score >= FUZZY_THRESHOLD {
        return Some(TextSignal::TemplateMatch(score));
    }

    let hits = keyword_hits(&norm);
    let has_cookies = contains_any(&norm, COOKIE_TERMS);
    let has_actions = contains_any(&norm, ACTION_TERMS);
    let has_privacy = contains_any(&norm, PRIVACY_TERMS);
    if hits >= MIN_KEYWORD_HITS && has_cookies && (has_actions || has_privacy) {
        return Some(TextSignal::KeywordScore(hits));
    }

    let prefix: String = norm.chars().take(SHORT_DOC_PREFIX_CHARS).collect();
    let words = norm.split(' ').filter(|w| !w.is_empty()).count();
    if contains_any(&prefix, PREFIX_TERMS) && hits >= SHORT_DOC_HITS && words < SHORT_DOC_MAX_WORDS
    {
        return Some(TextSignal::ShortDocument(hits));
    }

    None
}

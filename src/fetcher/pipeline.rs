//! Turns raw response bytes into UTF-8 page text.

use encoding_rs::Encoding;
use regex::Regex;
use std::sync::LazyLock;

use crate::fetcher::types::Charset;

static CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?([^"'\s;]+)"#).unwrap());

static META_CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<meta\s+[^>]*?charset\s*=\s*["']?([^"'\s/>]+)"#).unwrap());

static META_HTTP_EQUIV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+[^>]*?http-equiv\s*=\s*["']?content-type["']?[^>]*?content\s*=\s*["']?[^"'>]*?charset\s*=\s*([^"'\s;/>]+)"#).unwrap()
});

/// Decode a response body, never failing: malformed sequences become U+FFFD.
pub fn decode_body(content_type: &str, body_bytes: &[u8]) -> (String, Charset) {
    let charset = detect_charset(content_type, body_bytes);
    let (decoded, _encoding, _had_errors) = charset.encoding().decode(body_bytes);
    (decoded.into_owned(), charset)
}

fn label_to_charset(label: &str) -> Option<Charset> {
    Encoding::for_label(label.to_lowercase().as_bytes()).map(Charset::from_encoding)
}

pub fn detect_charset(content_type: &str, body_bytes: &[u8]) -> Charset {
    // 1. Content-Type header
    if let Some(charset) = CHARSET_REGEX
        .captures(content_type)
        .and_then(|c| c.get(1))
        .and_then(|m| label_to_charset(m.as_str()))
    {
        return charset;
    }

    // 2. <meta> declarations in the first 4KB
    let search_bytes = &body_bytes[..body_bytes.len().min(4096)];
    let search_str = String::from_utf8_lossy(search_bytes);

    for regex in [&*META_CHARSET_REGEX, &*META_HTTP_EQUIV_REGEX] {
        if let Some(charset) = regex
            .captures(&search_str)
            .and_then(|c| c.get(1))
            .and_then(|m| label_to_charset(m.as_str()))
        {
            return charset;
        }
    }

    // 3. Heuristic detection
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(search_bytes, false);
    Charset::from_encoding(detector.guess(None, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_charset_from_content_type() {
        let body = b"<html><head><title>Test</title></head></html>";
        let charset = detect_charset("text/html; charset=utf-8", body);
        assert!(matches!(charset, Charset::Utf8));
    }

    #[test]
    fn test_detect_charset_from_meta_tag() {
        let body = b"<html><head><meta charset=\"iso-8859-1\"><title>Test</title></head></html>";
        // ISO-8859-1 maps to Windows-1252 in encoding_rs
        assert!(matches!(detect_charset("text/html", body), Charset::Windows1252));
    }

    #[test]
    fn test_detect_charset_from_meta_http_equiv() {
        let body = b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=windows-1252\"><title>Test</title></head></html>";
        assert!(matches!(detect_charset("text/html", body), Charset::Windows1252));
    }

    #[test]
    fn test_decode_latin1_body() {
        let body = b"<html><head><meta charset=\"iso-8859-1\"></head><body>Espa\xf1a</body></html>";
        let (text, _) = decode_body("text/html", body);
        assert!(text.contains("España"));
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let body = b"caf\xc3 ok";
        let (text, charset) = decode_body("text/html; charset=utf-8", body);
        assert_eq!(charset, Charset::Utf8);
        assert!(text.contains('\u{FFFD}'));
        assert!(text.ends_with("ok"));
    }
}

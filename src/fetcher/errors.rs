use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Error taxonomy shared by every stage of an item's journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, connection resets, 429 and 5xx. Retried up to the attempt cap.
    NetworkTransient,
    /// 4xx other than 429, malformed URLs, denylisted domains. Never retried.
    NetworkPermanent,
    /// Consent wall, too-short text or an artifact phrase.
    ContentRejected,
    /// Parser or renderer failure inside one strategy.
    ExtractionException,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkTransient => "network_transient",
            Self::NetworkPermanent => "network_permanent",
            Self::ContentRejected => "content_rejected",
            Self::ExtractionException => "extraction_exception",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request timeout")]
    Timeout,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("request error: {0}")]
    Request(String),

    #[error("http error {status}")]
    Http { status: u16 },

    #[error("body too large ({0} bytes)")]
    BodyTooLarge(u64),

    #[error("denylisted domain: {0}")]
    Denylisted(String),

    #[error("unknown: {0}")]
    Unknown(String),
}

impl FetchError {
    pub fn should_retry(&self) -> bool {
        match self {
            Self::InvalidUrl(_) => false,
            Self::TooManyRedirects => false,
            Self::BodyTooLarge(_) => false,
            Self::Denylisted(_) => false,
            Self::Http { status } => *status == 429 || (500..600).contains(status),

            Self::Timeout => true,
            Self::Request(_) => true,
            Self::Unknown(_) => true,
        }
    }

    pub fn kind(&self) -> FailureKind {
        if self.should_retry() {
            FailureKind::NetworkTransient
        } else {
            FailureKind::NetworkPermanent
        }
    }

    /// Stable, machine-friendly classification written to the output sink.
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidUrl(_) => "invalid_url".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::TooManyRedirects => "too_many_redirects".to_string(),
            Self::Request(_) => "request_error".to_string(),
            Self::Http { status } => format!("http_{status}"),
            Self::BodyTooLarge(_) => "body_too_large".to_string(),
            Self::Denylisted(_) => "denylisted_domain".to_string(),
            Self::Unknown(_) => "error".to_string(),
        }
    }

    pub fn from_reqwest_error(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_redirect() {
            Self::TooManyRedirects
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
            }
        } else if err.is_builder() {
            Self::InvalidUrl(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
            Self::Request(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(FetchError::Timeout.should_retry());
        assert!(FetchError::Request("connection reset".into()).should_retry());
        assert!(FetchError::Http { status: 429 }.should_retry());
        assert!(FetchError::Http { status: 503 }.should_retry());

        assert!(!FetchError::Http { status: 404 }.should_retry());
        assert!(!FetchError::Http { status: 403 }.should_retry());
        assert!(!FetchError::InvalidUrl("nope".into()).should_retry());
        assert!(!FetchError::Denylisted("wsj.com".into()).should_retry());
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(FetchError::Timeout.reason(), "timeout");
        assert_eq!(FetchError::TooManyRedirects.reason(), "too_many_redirects");
        assert_eq!(FetchError::Request("x".into()).reason(), "request_error");
        assert_eq!(FetchError::Unknown("x".into()).reason(), "error");
        assert_eq!(FetchError::Http { status: 404 }.reason(), "http_404");
    }

    #[test]
    fn test_failure_kind() {
        assert_eq!(
            FetchError::Http { status: 404 }.kind(),
            FailureKind::NetworkPermanent
        );
        assert_eq!(FetchError::Timeout.kind(), FailureKind::NetworkTransient);
        assert_eq!(FailureKind::NetworkPermanent.to_string(), "network_permanent");
    }
}

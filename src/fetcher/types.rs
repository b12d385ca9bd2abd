use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetcher::errors::FetchError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charset {
    Utf8,
    Windows1252,
    ShiftJis,
    Gb2312,
    Big5,
    Other(String),
}

impl Charset {
    pub fn from_encoding(encoding: &'static encoding_rs::Encoding) -> Self {
        use std::ptr;

        if ptr::eq(encoding, encoding_rs::UTF_8) {
            Self::Utf8
        } else if ptr::eq(encoding, encoding_rs::WINDOWS_1252) {
            Self::Windows1252
        } else if ptr::eq(encoding, encoding_rs::SHIFT_JIS) {
            Self::ShiftJis
        } else if ptr::eq(encoding, encoding_rs::GBK) || ptr::eq(encoding, encoding_rs::GB18030) {
            Self::Gb2312
        } else if ptr::eq(encoding, encoding_rs::BIG5) {
            Self::Big5
        } else {
            Self::Other(encoding.name().to_string())
        }
    }

    pub fn encoding(&self) -> &'static encoding_rs::Encoding {
        match self {
            Self::Utf8 => encoding_rs::UTF_8,
            Self::Windows1252 => encoding_rs::WINDOWS_1252,
            Self::ShiftJis => encoding_rs::SHIFT_JIS,
            Self::Gb2312 => encoding_rs::GBK,
            Self::Big5 => encoding_rs::BIG5,
            Self::Other(name) => {
                encoding_rs::Encoding::for_label(name.as_bytes()).unwrap_or(encoding_rs::UTF_8)
            }
        }
    }
}

/// Outcome of one `Fetcher::fetch` call, retries included.
///
/// `status` is present for any terminal HTTP answer (including non-retriable
/// 4xx) and absent when every attempt failed at the network level or kept
/// hitting 429/5xx. `body` is present only for 2xx/3xx answers.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub requested_url: String,
    pub final_url: Option<Url>,
    pub status: Option<u16>,
    pub body: Option<String>,
    pub charset: Option<Charset>,
    pub error: Option<FetchError>,
    pub attempts: u32,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn success(
        requested_url: &str,
        final_url: Url,
        status: u16,
        body: String,
        charset: Charset,
        attempts: u32,
    ) -> Self {
        Self {
            requested_url: requested_url.to_string(),
            final_url: Some(final_url),
            status: Some(status),
            body: Some(body),
            charset: Some(charset),
            error: None,
            attempts,
            fetched_at: Utc::now(),
        }
    }

    pub fn failure(
        requested_url: &str,
        final_url: Option<Url>,
        status: Option<u16>,
        error: FetchError,
        attempts: u32,
    ) -> Self {
        Self {
            requested_url: requested_url.to_string(),
            final_url,
            status,
            body: None,
            charset: None,
            error: Some(error),
            attempts,
            fetched_at: Utc::now(),
        }
    }

    /// Body text when the fetch produced one and it is not blank.
    pub fn html(&self) -> Option<&str> {
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.body.is_some()
    }
}

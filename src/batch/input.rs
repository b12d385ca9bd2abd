//! Input table loading and work-item construction.

use encoding_rs::WINDOWS_1252;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::fetcher::normalize_target;

/// URL columns that already hold a publisher URL; resolution is skipped.
pub const CANONICAL_URL_COLUMNS: &[&str] = &["url_original", "resolved_url", "url_final"];
/// URL columns holding tracker or API endpoint links.
pub const TRACKER_URL_COLUMNS: &[&str] = &["url", "link", "url_redirect"];

#[derive(Error, Debug)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed csv header: {0}")]
    Csv(#[from] csv::Error),

    #[error("no url column found (tried {0})")]
    NoUrlColumn(String),

    #[error("key column {0:?} not present in input")]
    MissingKeyColumn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlForm {
    Canonical,
    Tracker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlColumn {
    pub index: usize,
    pub name: String,
    pub form: UrlForm,
}

/// One row's unit of work. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub key: String,
    pub source_url: String,
    pub canonical_hint: Option<String>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source_url: source_url.into(),
            canonical_hint: None,
        }
    }

    pub fn canonical(key: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            key: key.into(),
            source_url: url.clone(),
            canonical_hint: Some(url),
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.canonical_hint.is_some()
    }

    /// Normalized URL the item will be fetched from (before resolution).
    pub fn target(&self) -> Option<Url> {
        normalize_target(self.canonical_hint.as_deref().unwrap_or(&self.source_url))
    }
}

/// A headered CSV held as strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Decode as UTF-8 (BOM stripped), falling back to Latin-1.
fn decode_input(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("input is not utf-8, decoding as latin-1");
            WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()
        }
    }
}

impl InputTable {
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let bytes = std::fs::read(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&decode_input(&bytes))
    }

    /// Parse CSV text. Lines with the wrong number of fields are skipped.
    pub fn parse(text: &str) -> Result<Self, InputError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            match record {
                Ok(record) => rows.push(record.iter().map(str::to_string).collect()),
                Err(e) => warn!(line = line + 2, error = %e, "skipping malformed input line"),
            }
        }

        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn looks_like_url_column(&self, index: usize) -> bool {
        self.rows
            .iter()
            .any(|row| row.get(index).is_some_and(|v| v.starts_with("http")))
    }

    /// Highest-priority URL column: canonical forms, tracker forms, then
    /// the first column with `http` values.
    pub fn url_column(&self) -> Result<UrlColumn, InputError> {
        let named = CANONICAL_URL_COLUMNS
            .iter()
            .map(|name| (name, UrlForm::Canonical))
            .chain(TRACKER_URL_COLUMNS.iter().map(|name| (name, UrlForm::Tracker)))
            .find_map(|(name, form)| {
                self.column(name).map(|index| UrlColumn {
                    index,
                    name: name.to_string(),
                    form,
                })
            });
        if let Some(column) = named {
            return Ok(column);
        }

        (0..self.headers.len())
            .find(|&index| self.looks_like_url_column(index))
            .map(|index| UrlColumn {
                index,
                name: self.headers[index].clone(),
                form: UrlForm::Tracker,
            })
            .ok_or_else(|| {
                InputError::NoUrlColumn(
                    [CANONICAL_URL_COLUMNS, TRACKER_URL_COLUMNS].concat().join(", "),
                )
            })
    }

    /// Stable key per row: the key column's value, or the row index.
    pub fn row_keys(&self, key_column: Option<&str>) -> Result<Vec<String>, InputError> {
        match key_column {
            Some(name) => {
                let index = self
                    .column(name)
                    .ok_or_else(|| InputError::MissingKeyColumn(name.to_string()))?;
                Ok(self
                    .rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| {
                        row.get(index)
                            .filter(|v| !v.is_empty())
                            .cloned()
                            .unwrap_or_else(|| i.to_string())
                    })
                    .collect())
            }
            None => Ok((0..self.rows.len()).map(|i| i.to_string()).collect()),
        }
    }

    /// One item per row with a URL. A blank value in the chosen column falls
    /// back to the other candidate columns; rows without any URL are dropped.
    /// Repeated keys keep their first row.
    pub fn work_items(&self, key_column: Option<&str>) -> Result<Vec<WorkItem>, InputError> {
        let primary = self.url_column()?;
        let fallbacks: Vec<UrlColumn> = CANONICAL_URL_COLUMNS
            .iter()
            .map(|name| (name, UrlForm::Canonical))
            .chain(TRACKER_URL_COLUMNS.iter().map(|name| (name, UrlForm::Tracker)))
            .filter_map(|(name, form)| {
                let index = self.column(name)?;
                (index != primary.index).then(|| UrlColumn {
                    index,
                    name: name.to_string(),
                    form,
                })
            })
            .collect();

        let keys = self.row_keys(key_column)?;
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for (row, key) in self.rows.iter().zip(keys) {
            let value = std::iter::once(&primary)
                .chain(fallbacks.iter())
                .find_map(|column| {
                    row.get(column.index)
                        .filter(|v| !v.is_empty())
                        .map(|v| (v, column.form))
                });
            let Some((url, form)) = value else {
                debug!(key, "row has no url");
                continue;
            };
            if !seen.insert(key.clone()) {
                warn!(key, "duplicate row key, keeping first row");
                continue;
            }
            items.push(match form {
                UrlForm::Canonical => WorkItem::canonical(key, url.as_str()),
                UrlForm::Tracker => WorkItem::new(key, url.as_str()),
            });
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_canonical_column_preferred() {
        let table = InputTable::parse(
            "id,url,url_original\n1,https://finnhub.io/api/news?id=1,https://www.reuters.com/a\n",
        )
        .unwrap();
        let column = table.url_column().unwrap();
        assert_eq!(column.name, "url_original");
        assert_eq!(column.form, UrlForm::Canonical);

        let items = table.work_items(Some("id")).unwrap();
        assert_eq!(items, vec![WorkItem::canonical("1", "https://www.reuters.com/a")]);
    }

    #[test]
    fn test_blank_canonical_falls_back_to_tracker() {
        let table = InputTable::parse(
            "url,url_original\nhttps://finnhub.io/api/news?id=2,\n,\n",
        )
        .unwrap();
        let items = table.work_items(None).unwrap();
        assert_eq!(items, vec![WorkItem::new("0", "https://finnhub.io/api/news?id=2")]);
        assert!(!items[0].is_canonical());
    }

    #[test]
    fn test_detects_unnamed_url_column() {
        let table = InputTable::parse("headline,source_link\nTesla rallies,https://a.com/x\n").unwrap();
        let column = table.url_column().unwrap();
        assert_eq!(column.index, 1);
        assert_eq!(column.form, UrlForm::Tracker);
    }

    #[test]
    fn test_no_url_column() {
        let table = InputTable::parse("headline\nnothing here\n").unwrap();
        assert!(matches!(table.url_column(), Err(InputError::NoUrlColumn(_))));
    }

    #[test]
    fn test_skips_malformed_lines_and_trims() {
        let table = InputTable::parse("id,url\n1, https://a.com/1 \n2,https://a.com/2,extra\n3,https://a.com/3\n").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][1], "https://a.com/1");
    }

    #[test]
    fn test_missing_key_column() {
        let table = InputTable::parse("url\nhttps://a.com\n").unwrap();
        assert!(matches!(
            table.work_items(Some("article_id")),
            Err(InputError::MissingKeyColumn(_))
        ));
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let table = InputTable::parse("id,url\n7,https://a.com/1\n7,https://a.com/2\n").unwrap();
        let items = table.work_items(Some("id")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_url, "https://a.com/1");
    }

    #[test]
    fn test_load_bom_and_latin1() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\xEF\xBB\xBFurl,title\nhttps://a.com/1,ok\n").unwrap();
        let table = InputTable::load(file.path()).unwrap();
        assert_eq!(table.headers[0], "url");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"url,title\nhttps://a.com/1,Espa\xF1a\n").unwrap();
        let table = InputTable::load(file.path()).unwrap();
        assert_eq!(table.rows[0][1], "España");
    }

    #[test]
    fn test_target_strips_tracking() {
        let item = WorkItem::new("0", "https://a.com/x?utm_source=rss&id=4");
        assert_eq!(item.target().unwrap().as_str(), "https://a.com/x?id=4");
        assert!(WorkItem::new("1", "ftp://a.com/x").target().is_none());
    }
}

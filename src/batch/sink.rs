//! Durable output: the input rows augmented with each row's outcome.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::batch::PageOutcome;
use crate::batch::input::InputTable;

/// Columns appended to every input row.
pub const OUTPUT_COLUMNS: &[&str] = &[
    "final_url",
    "http_status",
    "article_text",
    "extractor",
    "error",
    "word_count",
];

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("sink task failed: {0}")]
    Join(String),
}

/// Receives the full result set at every checkpoint. Each call replaces
/// whatever the previous call wrote.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn persist(&self, outcomes: &HashMap<String, PageOutcome>) -> Result<(), SinkError>;
}

/// CSV file sink written through a temporary file and an atomic rename.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<(String, Vec<String>)>,
}

impl CsvSink {
    /// `keys[i]` is the key of `table.rows[i]`. Input columns named like an
    /// output column are replaced by the fresh values.
    pub fn new(path: impl Into<PathBuf>, table: &InputTable, keys: Vec<String>) -> Self {
        let kept: Vec<usize> = (0..table.headers.len())
            .filter(|&i| !OUTPUT_COLUMNS.contains(&table.headers[i].as_str()))
            .collect();

        let headers = kept
            .iter()
            .map(|&i| table.headers[i].clone())
            .chain(OUTPUT_COLUMNS.iter().map(|c| c.to_string()))
            .collect();
        let rows = keys
            .into_iter()
            .zip(&table.rows)
            .map(|(key, row)| {
                let values = kept
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or_default())
                    .collect();
                (key, values)
            })
            .collect();

        Self {
            path: path.into(),
            headers,
            rows,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render_rows(&self, outcomes: &HashMap<String, PageOutcome>) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|(key, values)| {
                let mut record = values.clone();
                match outcomes.get(key) {
                    Some(outcome) => record.extend([
                        outcome.final_url.clone().unwrap_or_default(),
                        outcome.http_status.map(|s| s.to_string()).unwrap_or_default(),
                        outcome.article_text.clone().unwrap_or_default(),
                        outcome.extractor.clone().unwrap_or_default(),
                        outcome.error.clone().unwrap_or_default(),
                        outcome.word_count.to_string(),
                    ]),
                    None => record.extend(std::iter::repeat_n(String::new(), OUTPUT_COLUMNS.len())),
                }
                record
            })
            .collect()
    }

    /// Accepted outcomes of a previous run, keyed like the current input.
    pub fn load_accepted(
        path: &Path,
        key_column: Option<&str>,
    ) -> Result<HashMap<String, PageOutcome>, SinkError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let key_index = key_column.and_then(|name| headers.iter().position(|h| h == name));

        let mut accepted = HashMap::new();
        for (i, record) in reader.records().enumerate() {
            let Ok(record) = record else { continue };
            let Ok(stored) = record.deserialize::<StoredOutcome>(Some(&headers)) else {
                continue;
            };
            if stored.extractor.as_deref().is_none_or(str::is_empty) {
                continue;
            }
            let key = key_index
                .and_then(|k| record.get(k))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| i.to_string());
            accepted.insert(key.clone(), stored.into_outcome(key));
        }
        debug!(count = accepted.len(), path = %path.display(), "loaded accepted outcomes");
        Ok(accepted)
    }
}

#[derive(Debug, Deserialize)]
struct StoredOutcome {
    final_url: Option<String>,
    http_status: Option<u16>,
    article_text: Option<String>,
    extractor: Option<String>,
    error: Option<String>,
    word_count: Option<usize>,
}

impl StoredOutcome {
    fn into_outcome(self, key: String) -> PageOutcome {
        PageOutcome {
            key,
            final_url: self.final_url,
            http_status: self.http_status,
            article_text: self.article_text,
            extractor: self.extractor,
            error: self.error,
            word_count: self.word_count.unwrap_or_default(),
        }
    }
}

fn write_atomically(path: &Path, headers: &[String], rows: &[Vec<String>]) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file_mut().flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[async_trait]
impl CheckpointSink for CsvSink {
    async fn persist(&self, outcomes: &HashMap<String, PageOutcome>) -> Result<(), SinkError> {
        let rows = self.render_rows(outcomes);
        let headers = self.headers.clone();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &headers, &rows))
            .await
            .map_err(|e| SinkError::Join(e.to_string()))??;

        debug!(path = %self.path.display(), rows = self.rows.len(), "checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InputTable {
        InputTable::parse("id,url,word_count\na,https://x.com/1,\nb,https://x.com/2,\n").unwrap()
    }

    fn accepted(key: &str) -> PageOutcome {
        PageOutcome {
            key: key.to_string(),
            final_url: Some("https://x.com/1".into()),
            http_status: Some(200),
            article_text: Some("Body, with \"quotes\"\nand lines".into()),
            extractor: Some("static".into()),
            error: None,
            word_count: 5,
        }
    }

    #[tokio::test]
    async fn test_persist_overwrites_and_roundtrips_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = CsvSink::new(&path, &table(), vec!["a".into(), "b".into()]);

        sink.persist(&HashMap::new()).await.unwrap();
        let mut outcomes = HashMap::new();
        outcomes.insert("a".to_string(), accepted("a"));
        sink.persist(&outcomes).await.unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(
            headers,
            vec!["id", "url", "final_url", "http_status", "article_text", "extractor", "error", "word_count"]
        );
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][5], "static");
        assert_eq!(&records[1][2], "");

        let loaded = CsvSink::load_accepted(&path, Some("id")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["a"], accepted("a"));
    }

    #[tokio::test]
    async fn test_unwritable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let sink = CsvSink::new(blocker.join("out.csv"), &table(), vec!["a".into(), "b".into()]);
        assert!(matches!(
            sink.persist(&HashMap::new()).await,
            Err(SinkError::Io { .. })
        ));
    }
}

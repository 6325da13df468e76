//! Missed-call writer implementations.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::types::{MissedCall, MissedCallQuery};

/// Writer errors.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("writer lock poisoned")]
    Poisoned,
}

/// Output format for file writers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON lines (one JSON object per line)
    #[default]
    Json,
    /// CSV with a header row
    Csv,
}

/// Missed-call writer trait.
#[async_trait]
pub trait MissedCallWriter: Send + Sync + std::fmt::Debug {
    /// Persist one missed call.
    async fn write(&self, call: &MissedCall) -> Result<(), WriterError>;

    /// Flush pending writes.
    async fn flush(&self) -> Result<(), WriterError>;

    /// Writer name for logging.
    fn name(&self) -> &str;
}

/// Append-only file writer with optional daily rotation.
#[derive(Debug)]
pub struct FileWriter {
    name: String,
    base_path: PathBuf,
    format: OutputFormat,
    rotate_daily: bool,
    current_file: RwLock<Option<CurrentFile>>,
}

#[derive(Debug)]
struct CurrentFile {
    writer: BufWriter<File>,
    date: NaiveDate,
    records: u64,
}

impl FileWriter {
    /// Create new file writer.
    pub fn new(name: &str, base_path: PathBuf, format: OutputFormat, rotate_daily: bool) -> Self {
        Self {
            name: name.to_string(),
            base_path,
            format,
            rotate_daily,
            current_file: RwLock::new(None),
        }
    }

    /// File name used for a given day.
    pub fn filename_for_date(&self, date: NaiveDate) -> String {
        let ext = match self.format {
            OutputFormat::Json => "jsonl",
            OutputFormat::Csv => "csv",
        };
        format!("missed_calls_{}.{}", date.format("%Y%m%d"), ext)
    }

    fn format_call(&self, call: &MissedCall) -> Result<String, WriterError> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string(call).map_err(|e| WriterError::Serialization(e.to_string()))
            }
            OutputFormat::Csv => Ok(call.to_csv_line()),
        }
    }

    /// Open the file for `today`, rotating if needed.
    fn ensure_file(&self, current: &mut Option<CurrentFile>, today: NaiveDate) -> Result<(), WriterError> {
        let needs_rotation = match current {
            Some(cf) if self.rotate_daily && cf.date != today => true,
            None => true,
            _ => false,
        };

        if !needs_rotation {
            return Ok(());
        }

        if let Some(mut cf) = current.take() {
            cf.writer.flush()?;
            info!(
                writer = %self.name,
                records = cf.records,
                date = %cf.date,
                "rotated missed-call file"
            );
        }

        let path = self.base_path.join(self.filename_for_date(today));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);

        if self.format == OutputFormat::Csv && is_new {
            writeln!(writer, "{}", MissedCall::csv_header())?;
        }

        info!(
            writer = %self.name,
            path = %path.display(),
            "opened missed-call file"
        );

        *current = Some(CurrentFile {
            writer,
            date: today,
            records: 0,
        });

        Ok(())
    }
}

#[async_trait]
impl MissedCallWriter for FileWriter {
    async fn write(&self, call: &MissedCall) -> Result<(), WriterError> {
        let line = self.format_call(call)?;

        let mut current = self.current_file.write().map_err(|_| WriterError::Poisoned)?;
        self.ensure_file(&mut current, Utc::now().date_naive())?;

        if let Some(cf) = current.as_mut() {
            writeln!(cf.writer, "{}", line)?;
            cf.records += 1;

            debug!(
                writer = %self.name,
                queue = ?call.queue_id(),
                "wrote missed call"
            );
        }

        Ok(())
    }

    async fn flush(&self) -> Result<(), WriterError> {
        let mut current = self.current_file.write().map_err(|_| WriterError::Poisoned)?;
        if let Some(cf) = current.as_mut() {
            cf.writer.flush()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// In-memory writer (for testing/debugging).
#[derive(Debug)]
pub struct MemoryWriter {
    name: String,
    records: RwLock<VecDeque<MissedCall>>,
    max_records: usize,
}

impl MemoryWriter {
    /// Create new memory writer.
    pub fn new(name: &str, max_records: usize) -> Self {
        Self {
            name: name.to_string(),
            records: RwLock::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records,
        }
    }

    /// All stored calls, oldest first.
    pub fn all(&self) -> Vec<MissedCall> {
        match self.records.read() {
            Ok(records) => records.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Stored calls matching the query, newest first.
    pub fn query(&self, query: &MissedCallQuery) -> Vec<MissedCall> {
        let records = match self.records.read() {
            Ok(records) => records,
            Err(_) => return Vec::new(),
        };

        records
            .iter()
            .rev()
            .filter(|c| query.matches(c))
            .take(query.limit())
            .cloned()
            .collect()
    }

    /// Get total count.
    pub fn count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MissedCallWriter for MemoryWriter {
    async fn write(&self, call: &MissedCall) -> Result<(), WriterError> {
        let mut records = self.records.write().map_err(|_| WriterError::Poisoned)?;

        if records.len() >= self.max_records {
            records.pop_front();
        }

        records.push_back(call.clone());

        debug!(
            writer = %self.name,
            queue = ?call.queue_id(),
            total = records.len(),
            "wrote missed call to memory"
        );

        Ok(())
    }

    async fn flush(&self) -> Result<(), WriterError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::{Cell, CdrRecord};

    pub(crate) fn missed_call(queue: i64, connection_id: u64) -> MissedCall {
        let cells = std::array::from_fn(|i| match i {
            0 => Cell::Int(Some(queue)),
            6 => Cell::Seconds(12),
            14 => Cell::Text(Some("ABANDON".into())),
            _ => Cell::Text(None),
        });
        MissedCall::new(
            CdrRecord::new(cells),
            "switch",
            connection_id,
            "127.0.0.1:50000".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_memory_writer() {
        let writer = MemoryWriter::new("test", 100);

        writer.write(&missed_call(4100, 1)).await.unwrap();

        assert_eq!(writer.count(), 1);
        let recent = writer.query(&MissedCallQuery::default());
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].queue_id(), Some(4100));
    }

    #[tokio::test]
    async fn test_memory_writer_max_records() {
        let writer = MemoryWriter::new("test", 2);

        writer.write(&missed_call(1, 1)).await.unwrap();
        writer.write(&missed_call(2, 1)).await.unwrap();
        writer.write(&missed_call(3, 1)).await.unwrap();

        assert_eq!(writer.count(), 2);

        let recent = writer.query(&MissedCallQuery::default());
        assert_eq!(recent[0].queue_id(), Some(3));
        assert_eq!(recent[1].queue_id(), Some(2));
    }

    #[tokio::test]
    async fn test_query_by_queue_range_and_limit() {
        let writer = MemoryWriter::new("test", 100);

        writer.write(&missed_call(4100, 1)).await.unwrap();
        writer.write(&missed_call(4200, 2)).await.unwrap();
        writer.write(&missed_call(4100, 3)).await.unwrap();

        let by_queue = MissedCallQuery {
            queue: Some(4100),
            ..Default::default()
        };
        let calls = writer.query(&by_queue);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].connection_id, 3);

        let now = Utc::now();
        let hour = chrono::Duration::hours(1);
        let around_now = MissedCallQuery {
            since: Some(now - hour),
            until: Some(now + hour),
            ..Default::default()
        };
        assert_eq!(writer.query(&around_now).len(), 3);

        let later = MissedCallQuery {
            since: Some(now + hour),
            ..Default::default()
        };
        assert!(writer.query(&later).is_empty());

        let newest = MissedCallQuery {
            limit: Some(1),
            ..Default::default()
        };
        let calls = writer.query(&newest);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].queue_id(), Some(4100));
        assert_eq!(calls[0].connection_id, 3);
    }

    #[tokio::test]
    async fn test_file_writer_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::new("file", dir.path().to_path_buf(), OutputFormat::Json, true);

        writer.write(&missed_call(4100, 1)).await.unwrap();
        writer.write(&missed_call(4200, 1)).await.unwrap();
        writer.flush().await.unwrap();

        let path = dir.path().join(writer.filename_for_date(Utc::now().date_naive()));
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["record"]["queue_id"], 4100);
    }

    #[tokio::test]
    async fn test_file_writer_csv_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let writer = FileWriter::new("file", path.clone(), OutputFormat::Csv, false);
        writer.write(&missed_call(4100, 1)).await.unwrap();
        writer.flush().await.unwrap();
        let file_name = writer.filename_for_date(Utc::now().date_naive());
        drop(writer);

        // Reopening appends without repeating the header
        let writer = FileWriter::new("file", path.clone(), OutputFormat::Csv, false);
        writer.write(&missed_call(4200, 1)).await.unwrap();
        writer.flush().await.unwrap();

        let contents = std::fs::read_to_string(path.join(file_name)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], MissedCall::csv_header());
        assert!(lines[2].contains(",4200,"));
    }
}

//! Append-only CSV log of recognition events.
//!
//! Format: a `timestamp,name,distance` header row written once, when the
//! file is first created, followed by one row per event. Single writer
//! assumed; concurrent processes appending to the same file are not
//! coordinated.

use crate::matcher::MatchResult;
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOG_HEADER: &str = "timestamp,name,distance";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("failed to append to {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One recognition event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub name: String,
    pub distance: f32,
}

impl LogRecord {
    pub fn now(name: impl Into<String>, distance: f32) -> Self {
        Self {
            timestamp: Local::now(),
            name: name.into(),
            distance,
        }
    }

    pub fn from_match(result: &MatchResult) -> Self {
        Self::now(result.name.clone(), result.distance)
    }

    /// Render as one CSV row (without the trailing newline).
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{:.4}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            csv_field(&self.name),
            self.distance
        )
    }
}

/// Quote a field if it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Handle to the persistent event log file.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record, writing the header first if the file does not exist yet.
    pub fn append(&self, record: &LogRecord) -> Result<(), EventLogError> {
        let io_err = |source| EventLogError::Io {
            path: self.path.clone(),
            source,
        };

        let write_header = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        let mut buf = String::new();
        if write_header {
            buf.push_str(LOG_HEADER);
            buf.push('\n');
        }
        buf.push_str(&record.to_csv_row());
        buf.push('\n');

        file.write_all(buf.as_bytes()).map_err(io_err)
    }

    /// Append a record, reporting failures as warnings instead of returning them.
    ///
    /// Returns whether the record was written.
    pub fn log(&self, record: &LogRecord) -> bool {
        match self.append(record) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, name = %record.name, "event log write failed");
                false
            }
        }
    }
}

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// All errors produced by the LMT statistics engine.
#[derive(Error, Debug)]
pub enum LmtError {
    /// The export contained no usable data rows.
    #[error("No usable rows in input ({rows_read} read, {rows_skipped} skipped)")]
    EmptyInput {
        rows_read: usize,
        rows_skipped: usize,
    },

    /// A data row could not be turned into a usage record.
    #[error("Malformed row {row}: {reason} [{raw}]")]
    MalformedRow {
        row: usize,
        reason: String,
        raw: String,
    },

    /// A record's date lies outside the plausible reporting window.
    #[error("Row {row}: date {date} outside plausible range {earliest}..={latest}")]
    OutOfRangeDate {
        row: usize,
        date: NaiveDate,
        earliest: NaiveDate,
        latest: NaiveDate,
    },

    /// The requested grouping dimension is not one the aggregator knows.
    #[error("Unrecognised grouping dimension: {0}")]
    EmptyGroup(String),

    /// The header row lacks a column the parser requires.
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The delimited-text reader failed below the row level.
    #[error("Failed to read delimited input: {0}")]
    Csv(#[from] csv::Error),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LmtError {
    /// Row-level errors are recovered by skipping the row; everything else
    /// aborts the pipeline.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            LmtError::MalformedRow { .. } | LmtError::OutOfRangeDate { .. }
        )
    }
}

/// Convenience alias used throughout the LMT crates.
pub type Result<T> = std::result::Result<T, LmtError>;

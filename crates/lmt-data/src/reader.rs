//! Delimited-text export reading for the LMT statistics engine.
//!
//! Turns a license-metering export into a lazy stream of [`UsageRecord`]s.
//! Malformed rows surface as row-level errors and never stop the stream.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use lmt_core::config::{Encoding, ParserConfig};
use lmt_core::error::{LmtError, Result};
use lmt_core::models::UsageRecord;
use lmt_core::time_utils::{resolve_timezone, TimestampParser};
use tracing::{debug, warn};

// ── Public API ────────────────────────────────────────────────────────────────

/// Find all `.csv` files recursively under `dir`, sorted by path.
pub fn find_export_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        warn!("Export path does not exist: {}", dir.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnLayout {
    server: usize,
    product: usize,
    timestamp: usize,
    peak_value: usize,
    license_count: Option<usize>,
}

/// Lazy reader yielding one [`UsageRecord`] (or row-level error) per data row.
///
/// The stream is finite and cannot be restarted; re-open the source to read
/// it again.
pub struct RecordReader<R: Read> {
    inner: csv::Reader<R>,
    /// `None` when the source had no header row at all.
    layout: Option<ColumnLayout>,
    header_len: usize,
    timestamps: TimestampParser,
    encoding: Encoding,
    delimiter: char,
    record: csv::ByteRecord,
    row: usize,
    done: bool,
}

impl RecordReader<File> {
    /// Open `path` and read its header row.
    pub fn from_path(path: &Path, config: &ParserConfig) -> Result<Self> {
        let file = File::open(path).map_err(|source| LmtError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Opened export {}", path.display());
        Self::from_reader(file, config)
    }
}

impl<R: Read> RecordReader<R> {
    /// Wrap any byte source and read its header row.
    ///
    /// Fails when the configuration is invalid or the header lacks a
    /// required column. A source with no header at all yields an empty
    /// stream.
    pub fn from_reader(reader: R, config: &ParserConfig) -> Result<Self> {
        let delimiter = config.delimiter_byte()?;
        let tz = resolve_timezone(&config.source_timezone)?;

        let mut inner = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = inner
            .byte_headers()?
            .iter()
            .map(|field| {
                config
                    .encoding
                    .decode(field)
                    .trim_start_matches('\u{feff}')
                    .trim()
                    .to_lowercase()
            })
            .collect();

        let no_header = headers.iter().all(|h| h.is_empty());
        let layout = if no_header {
            None
        } else {
            Some(resolve_layout(&headers, config)?)
        };

        Ok(Self {
            inner,
            layout,
            header_len: headers.len(),
            timestamps: TimestampParser::new(tz),
            encoding: config.encoding,
            delimiter: config.delimiter,
            record: csv::ByteRecord::new(),
            row: 0,
            done: no_header,
        })
    }

    /// Number of data rows consumed so far.
    pub fn rows_read(&self) -> usize {
        self.row
    }

    fn parse_current(&self, layout: ColumnLayout) -> Result<UsageRecord> {
        let fields: Vec<String> = self
            .record
            .iter()
            .map(|f| self.encoding.decode(f))
            .collect();
        let malformed = |reason: String| LmtError::MalformedRow {
            row: self.row,
            reason,
            raw: fields.join(&self.delimiter.to_string()),
        };

        if fields.len() != self.header_len {
            return Err(malformed(format!(
                "expected {} fields, found {}",
                self.header_len,
                fields.len()
            )));
        }

        let required = |idx: usize, name: &'static str| {
            let value = fields[idx].trim();
            if value.is_empty() {
                Err(malformed(format!("missing {}", name)))
            } else {
                Ok(value)
            }
        };

        let server_id = required(layout.server, "server identifier")?;
        let product_id = required(layout.product, "product identifier")?;
        let raw_timestamp = required(layout.timestamp, "timestamp")?;
        let raw_peak = required(layout.peak_value, "peak value")?;

        let timestamp = self
            .timestamps
            .parse(raw_timestamp)
            .ok_or_else(|| malformed(format!("unparseable timestamp \"{}\"", raw_timestamp)))?;

        let peak_value = match raw_peak.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => v,
            Ok(_) => {
                return Err(malformed(format!(
                    "peak value {} is negative or not finite",
                    raw_peak
                )))
            }
            Err(_) => {
                return Err(malformed(format!(
                    "peak value \"{}\" is not a number",
                    raw_peak
                )))
            }
        };

        let license_count = match layout.license_count.map(|idx| fields[idx].trim()) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_license_count(raw)
                    .ok_or_else(|| malformed(format!("invalid license count \"{}\"", raw)))?,
            ),
        };

        Ok(UsageRecord {
            row: self.row,
            server_id: server_id.to_string(),
            product_id: product_id.to_string(),
            timestamp,
            peak_value,
            license_count,
        })
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<UsageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let layout = self.layout?;

        match self.inner.read_byte_record(&mut self.record) {
            Ok(false) => {
                self.done = true;
                debug!("RecordReader: {} data rows read", self.row);
                None
            }
            Ok(true) => {
                self.row += 1;
                let result = self.parse_current(layout);
                if let Err(err) = &result {
                    warn!("Skipping row: {}", err);
                }
                Some(result)
            }
            Err(err) if err.is_io_error() => {
                self.done = true;
                Some(Err(err.into()))
            }
            Err(err) => {
                self.row += 1;
                warn!("Skipping row {}: {}", self.row, err);
                Some(Err(LmtError::MalformedRow {
                    row: self.row,
                    reason: err.to_string(),
                    raw: String::new(),
                }))
            }
        }
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Map header names to column positions.
fn resolve_layout(headers: &[String], config: &ParserConfig) -> Result<ColumnLayout> {
    if config.positional {
        if headers.len() < 4 {
            return Err(LmtError::MissingColumn(format!(
                "positional layout needs at least 4 columns, header has {}",
                headers.len()
            )));
        }
        return Ok(ColumnLayout {
            server: 0,
            product: 1,
            timestamp: 2,
            peak_value: 3,
            license_count: (headers.len() > 4).then_some(4),
        });
    }

    let find = |candidates: &[String]| {
        candidates.iter().find_map(|name| {
            let wanted = name.trim().to_lowercase();
            headers.iter().position(|h| *h == wanted)
        })
    };
    let require = |candidates: &[String], fallback: &str| {
        find(candidates).ok_or_else(|| {
            LmtError::MissingColumn(
                candidates
                    .first()
                    .cloned()
                    .unwrap_or_else(|| fallback.to_string()),
            )
        })
    };

    let columns = &config.columns;
    Ok(ColumnLayout {
        server: require(&columns.server, "server_id")?,
        product: require(&columns.product, "product_id")?,
        timestamp: require(&columns.timestamp, "timestamp")?,
        peak_value: require(&columns.peak_value, "peak_value")?,
        license_count: find(&columns.license_count),
    })
}

/// Non-negative integer, also accepting integral floats such as `"12.0"`.
fn parse_license_count(raw: &str) -> Option<u64> {
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LmtError, Result};
use crate::time_utils::TimeBucket;

// ── EngineConfig ──────────────────────────────────────────────────────────────

/// Everything the engine needs, passed explicitly on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parser: ParserConfig,
    pub normalizer: NormalizerConfig,
    /// Bucket used by the trend tables of the summary report.
    pub trend_bucket: TimeBucket,
}

impl EngineConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| LmtError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.parser.validate()?;
        Ok(config)
    }
}

// ── ParserConfig ──────────────────────────────────────────────────────────────

/// Text encoding of the export file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// UTF-8; invalid sequences are replaced rather than rejected.
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// ISO-8859-1, as written by some older export tools.
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl Encoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Accepted header names for each attribute, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub server: Vec<String>,
    pub product: Vec<String>,
    pub timestamp: Vec<String>,
    pub peak_value: Vec<String>,
    pub license_count: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            server: names(&["server_id", "server", "server_name", "hostname", "computer_name"]),
            product: names(&["product_id", "product", "product_name", "software"]),
            timestamp: names(&["timestamp", "date", "time", "data_collection_time", "period"]),
            peak_value: names(&["peak_value", "peak", "peak_usage", "max_usage"]),
            license_count: names(&[
                "license_count",
                "licenses",
                "entitlement",
                "license_entitlement",
            ]),
        }
    }
}

/// How the raw export is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Field delimiter; must be a single ASCII character.
    pub delimiter: char,
    pub encoding: Encoding,
    /// Ignore header names and read server, product, timestamp, peak value
    /// and license count by position.
    pub positional: bool,
    pub columns: ColumnNames,
    /// Zone used for timestamps written without an offset (`"auto"` allowed).
    pub source_timezone: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            encoding: Encoding::Utf8,
            positional: false,
            columns: ColumnNames::default(),
            source_timezone: "UTC".to_string(),
        }
    }
}

impl ParserConfig {
    /// The delimiter as the single byte the reader expects.
    pub fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(LmtError::Config(format!(
                "delimiter {:?} is not a single ASCII character",
                self.delimiter
            )))
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.delimiter_byte().map(|_| ())
    }
}

// ── NormalizerConfig ──────────────────────────────────────────────────────────

/// How parsed records are canonicalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Canonical zone records are bucketed in (`"auto"` allowed).
    pub timezone: String,
    /// Timestamp resolution: `day` (default) or `hour`.
    pub resolution: TimeBucket,
    /// Earliest plausible observation date (inclusive).
    pub earliest_date: NaiveDate,
    /// Latest plausible observation date (inclusive).
    pub latest_date: NaiveDate,
    /// Alternative server names mapped to the canonical one.
    pub server_aliases: BTreeMap<String, String>,
    /// Alternative product names mapped to the canonical one.
    pub product_aliases: BTreeMap<String, String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            resolution: TimeBucket::Day,
            earliest_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
            latest_date: NaiveDate::from_ymd_opt(2099, 12, 31).unwrap_or_default(),
            server_aliases: BTreeMap::new(),
            product_aliases: BTreeMap::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

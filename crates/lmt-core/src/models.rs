use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LmtError;
use crate::time_utils::TimeBucket;

/// One metered observation as read from the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// 1-based index of the data row in its source (header excluded).
    pub row: usize,
    /// Server identifier as written in the export.
    pub server_id: String,
    /// Product identifier as written in the export.
    pub product_id: String,
    /// Observation time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Metered peak consumption, never negative.
    pub peak_value: f64,
    /// Entitled license count, when the export carries one.
    #[serde(default)]
    pub license_count: Option<u64>,
}

/// A usage record after identifier and timestamp canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub server_id: String,
    pub product_id: String,
    /// Bucket start, wall-clock time in the canonical zone.
    pub timestamp: NaiveDateTime,
    pub peak_value: f64,
    #[serde(default)]
    pub license_count: Option<u64>,
}

impl NormalizedRecord {
    /// `peak_value / license_count`, when a non-zero entitlement is known.
    pub fn utilization(&self) -> Option<f64> {
        match self.license_count {
            Some(licenses) if licenses > 0 => Some(self.peak_value / licenses as f64),
            _ => None,
        }
    }
}

// ── Dimension ─────────────────────────────────────────────────────────────────

/// The axis along which records are partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// The whole record set as one group.
    Overall,
    Server,
    Product,
    ServerProduct,
    TimeBucket(TimeBucket),
    /// Product crossed with a time bucket, for per-product trends.
    ProductTrend(TimeBucket),
}

impl Dimension {
    /// The group a record falls into under this dimension.
    pub fn key_for(&self, record: &NormalizedRecord) -> GroupKey {
        match self {
            Dimension::Overall => GroupKey::Overall,
            Dimension::Server => GroupKey::Server(record.server_id.clone()),
            Dimension::Product => GroupKey::Product(record.product_id.clone()),
            Dimension::ServerProduct => GroupKey::ServerProduct {
                server: record.server_id.clone(),
                product: record.product_id.clone(),
            },
            Dimension::TimeBucket(bucket) => GroupKey::Bucket(bucket.truncate(record.timestamp)),
            Dimension::ProductTrend(bucket) => GroupKey::ProductBucket {
                product: record.product_id.clone(),
                bucket: bucket.truncate(record.timestamp),
            },
        }
    }

    /// Time bucket used by this dimension, if any.
    pub fn bucket(&self) -> Option<TimeBucket> {
        match self {
            Dimension::TimeBucket(b) | Dimension::ProductTrend(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Overall => f.write_str("overall"),
            Dimension::Server => f.write_str("server"),
            Dimension::Product => f.write_str("product"),
            Dimension::ServerProduct => f.write_str("server-product"),
            Dimension::TimeBucket(b) => write!(f, "{}", b),
            Dimension::ProductTrend(b) => write!(f, "product-{}", b),
        }
    }
}

impl FromStr for Dimension {
    type Err = LmtError;

    /// Accepts the display names plus a few spellings such as `by-server`,
    /// `server_and_product`, `daily` or `product-month`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.trim().to_lowercase().replace(['_', ' '], "-");
        let name = cleaned.strip_prefix("by-").unwrap_or(&cleaned);

        let dimension = match name {
            "overall" | "all" => Dimension::Overall,
            "server" => Dimension::Server,
            "product" => Dimension::Product,
            "server-product" | "server-and-product" => Dimension::ServerProduct,
            "time" | "time-bucket" => Dimension::TimeBucket(TimeBucket::Day),
            "product-trend" => Dimension::ProductTrend(TimeBucket::Day),
            other => {
                if let Some(bucket) = other.strip_prefix("product-") {
                    bucket
                        .parse::<TimeBucket>()
                        .map(Dimension::ProductTrend)
                        .map_err(|_| LmtError::EmptyGroup(s.to_string()))?
                } else {
                    other
                        .parse::<TimeBucket>()
                        .map(Dimension::TimeBucket)
                        .map_err(|_| LmtError::EmptyGroup(s.to_string()))?
                }
            }
        };
        Ok(dimension)
    }
}

// ── GroupKey ──────────────────────────────────────────────────────────────────

/// Dimension values identifying one partition of the record set.
///
/// Ordering is ascending by identifier and chronological by bucket, which is
/// the row order of every summary table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Overall,
    Server(String),
    Product(String),
    ServerProduct { server: String, product: String },
    Bucket(NaiveDateTime),
    ProductBucket { product: String, bucket: NaiveDateTime },
}

impl GroupKey {
    /// Human-readable label; buckets are rendered at `bucket` granularity.
    pub fn label(&self, bucket: Option<TimeBucket>) -> String {
        let bucket = bucket.unwrap_or_default();
        match self {
            GroupKey::Overall => "all".to_string(),
            GroupKey::Server(s) => s.clone(),
            GroupKey::Product(p) => p.clone(),
            GroupKey::ServerProduct { server, product } => format!("{} / {}", server, product),
            GroupKey::Bucket(ts) => bucket.label(*ts),
            GroupKey::ProductBucket { product, bucket: ts } => {
                format!("{} @ {}", product, bucket.label(*ts))
            }
        }
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// A single peak value together with where and when it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    pub timestamp: NaiveDateTime,
    pub server_id: String,
    pub product_id: String,
}

impl Observation {
    pub fn of(record: &NormalizedRecord) -> Self {
        Self {
            value: record.peak_value,
            timestamp: record.timestamp,
            server_id: record.server_id.clone(),
            product_id: record.product_id.clone(),
        }
    }
}

/// License-compliance figures for records that carry an entitlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    /// Records with a non-zero license count.
    pub licensed_records: u64,
    /// Highest `peak_value / license_count` in the group.
    pub peak_ratio: f64,
    /// Mean of the per-record ratios.
    pub mean_ratio: f64,
    /// Records whose ratio exceeds 1.0.
    pub over_consumption: u64,
}

/// Derived statistics for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatistics {
    pub key: GroupKey,
    pub label: String,
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub max: Observation,
    pub min: Observation,
    #[serde(default)]
    pub utilization: Option<Utilization>,
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// Maximum number of individual row issues kept as samples.
pub const MAX_ISSUE_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Malformed,
    OutOfRange,
}

/// One skipped row, kept for the caller's data-quality review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowIssue {
    pub row: usize,
    pub kind: IssueKind,
    pub detail: String,
}

/// Row-level outcome counters reported next to every successful result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Data rows read from all sources.
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub out_of_range_rows: usize,
    /// Records folded into another with the same server, product and bucket.
    pub duplicates_merged: usize,
    /// Records left after normalization.
    pub records_normalized: usize,
    #[serde(default)]
    pub issues: Vec<RowIssue>,
}

impl Diagnostics {
    /// Count a row-level error; other error kinds are ignored.
    pub fn record_issue(&mut self, err: &LmtError) {
        let (row, kind) = match err {
            LmtError::MalformedRow { row, .. } => {
                self.malformed_rows += 1;
                (*row, IssueKind::Malformed)
            }
            LmtError::OutOfRangeDate { row, .. } => {
                self.out_of_range_rows += 1;
                (*row, IssueKind::OutOfRange)
            }
            _ => return,
        };
        if self.issues.len() < MAX_ISSUE_SAMPLES {
            self.issues.push(RowIssue {
                row,
                kind,
                detail: err.to_string(),
            });
        }
    }

    /// Total rows dropped for row-level errors.
    pub fn rows_skipped(&self) -> usize {
        self.malformed_rows + self.out_of_range_rows
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

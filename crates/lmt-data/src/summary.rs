//! Named summary tables for the presentation layer.
//!
//! Everything here is plain data: no markup, no formatting for display.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use lmt_core::models::{Diagnostics, Dimension, GroupStatistics, NormalizedRecord, Observation};
use lmt_core::time_utils::TimeBucket;
use serde::Serialize;

use crate::aggregator::Aggregator;
use crate::filter::FilterSpec;

// ── SummaryTable ──────────────────────────────────────────────────────────────

/// The reporting views the presentation layer renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    /// Single row: the peak across all servers and products.
    OverallPeak,
    PerServerPeak,
    /// Product crossed with the trend bucket.
    PerProductTrend,
    /// Server/product pairs that carry a license entitlement.
    Utilization,
    /// All products together, per trend bucket.
    TimeTrend,
    /// An ad-hoc single-dimension table.
    Custom,
}

/// Ordered statistics rows plus how they were produced. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryTable {
    kind: SummaryKind,
    dimension: Dimension,
    filter: FilterSpec,
    generated_at: DateTime<Utc>,
    rows: Vec<GroupStatistics>,
}

impl SummaryTable {
    pub fn new(
        kind: SummaryKind,
        dimension: Dimension,
        filter: FilterSpec,
        generated_at: DateTime<Utc>,
        rows: Vec<GroupStatistics>,
    ) -> Self {
        Self {
            kind,
            dimension,
            filter,
            generated_at,
            rows,
        }
    }

    pub fn kind(&self) -> SummaryKind {
        self.kind
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn rows(&self) -> &[GroupStatistics] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ── Headline ──────────────────────────────────────────────────────────────────

/// Scalar figures shown alongside the tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Headline {
    pub records: usize,
    pub servers: usize,
    pub products: usize,
    /// Summed peak values divided by the number of distinct servers.
    pub mean_peak_per_server: f64,
    pub mean_records_per_server: f64,
    pub overall_peak: Option<Observation>,
}

// ── SummaryReport ─────────────────────────────────────────────────────────────

/// The full set of views produced for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    pub filter: FilterSpec,
    pub overall_peak: SummaryTable,
    pub per_server_peak: SummaryTable,
    pub per_product_trend: SummaryTable,
    pub utilization: SummaryTable,
    pub time_trend: SummaryTable,
    pub headline: Headline,
    pub diagnostics: Diagnostics,
}

impl SummaryReport {
    /// All tables in report order.
    pub fn tables(&self) -> [&SummaryTable; 5] {
        [
            &self.overall_peak,
            &self.per_server_peak,
            &self.per_product_trend,
            &self.utilization,
            &self.time_trend,
        ]
    }
}

// ── SummaryBuilder ────────────────────────────────────────────────────────────

/// Assembles [`SummaryReport`]s from filtered records.
#[derive(Debug, Clone, Copy)]
pub struct SummaryBuilder {
    trend_bucket: TimeBucket,
}

impl SummaryBuilder {
    pub fn new(trend_bucket: TimeBucket) -> Self {
        Self { trend_bucket }
    }

    /// Dimension backing each reporting view.
    pub fn dimension_for(&self, kind: SummaryKind) -> Dimension {
        match kind {
            SummaryKind::OverallPeak => Dimension::Overall,
            SummaryKind::PerServerPeak => Dimension::Server,
            SummaryKind::PerProductTrend => Dimension::ProductTrend(self.trend_bucket),
            SummaryKind::Utilization | SummaryKind::Custom => Dimension::ServerProduct,
            SummaryKind::TimeTrend => Dimension::TimeBucket(self.trend_bucket),
        }
    }

    /// Build one view over `records`, which must already be filtered by
    /// `filter`.
    pub fn table(
        &self,
        kind: SummaryKind,
        records: &[NormalizedRecord],
        filter: &FilterSpec,
        generated_at: DateTime<Utc>,
    ) -> SummaryTable {
        let dimension = self.dimension_for(kind);
        let mut rows = Aggregator::aggregate(records, dimension);
        if kind == SummaryKind::Utilization {
            rows.retain(|row| row.utilization.is_some());
        }
        SummaryTable::new(kind, dimension, filter.clone(), generated_at, rows)
    }

    /// Build every view. Diagnostics are left empty for the caller to attach.
    pub fn build(
        &self,
        records: &[NormalizedRecord],
        filter: &FilterSpec,
        generated_at: DateTime<Utc>,
    ) -> SummaryReport {
        let table = |kind| self.table(kind, records, filter, generated_at);

        SummaryReport {
            generated_at,
            filter: filter.clone(),
            overall_peak: table(SummaryKind::OverallPeak),
            per_server_peak: table(SummaryKind::PerServerPeak),
            per_product_trend: table(SummaryKind::PerProductTrend),
            utilization: table(SummaryKind::Utilization),
            time_trend: table(SummaryKind::TimeTrend),
            headline: Self::headline(records),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn headline(records: &[NormalizedRecord]) -> Headline {
        if records.is_empty() {
            return Headline::default();
        }

        let servers: BTreeSet<&str> = records.iter().map(|r| r.server_id.as_str()).collect();
        let products: BTreeSet<&str> = records.iter().map(|r| r.product_id.as_str()).collect();
        let total_peak: f64 = records.iter().map(|r| r.peak_value).sum();
        let overall_peak = Aggregator::aggregate(records, Dimension::Overall)
            .into_iter()
            .next()
            .map(|g| g.max);

        Headline {
            records: records.len(),
            servers: servers.len(),
            products: products.len(),
            mean_peak_per_server: total_peak / servers.len() as f64,
            mean_records_per_server: records.len() as f64 / servers.len() as f64,
            overall_peak,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

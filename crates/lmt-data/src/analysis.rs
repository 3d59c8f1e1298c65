//! Engine entry point for the LMT statistics pipeline.
//!
//! Parses and normalizes an export once into an immutable [`Dataset`], then
//! filters, aggregates and summarizes it per request.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use lmt_core::config::EngineConfig;
use lmt_core::error::{LmtError, Result};
use lmt_core::models::{Diagnostics, Dimension, NormalizedRecord};
use lmt_core::time_utils::TimeBucket;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::filter::FilterSpec;
use crate::normalizer::Normalizer;
use crate::reader::RecordReader;
use crate::summary::{SummaryBuilder, SummaryKind, SummaryReport, SummaryTable};

// ── Dataset ───────────────────────────────────────────────────────────────────

/// A parsed and normalized export.
///
/// Cloning is cheap and shares the records read-only, so one snapshot can
/// serve any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Arc<[NormalizedRecord]>,
    diagnostics: Diagnostics,
    normalizer: Arc<Normalizer>,
    trend_bucket: TimeBucket,
}

impl Dataset {
    /// Load a single export file.
    pub fn load_path(path: &Path, config: &EngineConfig) -> Result<Self> {
        Self::load_paths(&[path.to_path_buf()], config)
    }

    /// Load several export files as one dataset.
    ///
    /// Observations re-sent across files are merged like any other
    /// duplicate.
    pub fn load_paths(paths: &[PathBuf], config: &EngineConfig) -> Result<Self> {
        let normalizer = Normalizer::new(&config.normalizer)?;
        let load_start = std::time::Instant::now();

        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            readers.push(RecordReader::from_path(path, &config.parser)?);
        }

        let mut diagnostics = Diagnostics::default();
        let records = normalizer.normalize_stream(readers.into_iter().flatten(), &mut diagnostics)?;

        debug!(
            "Loaded {} files in {:.3}s",
            paths.len(),
            load_start.elapsed().as_secs_f64()
        );
        Self::finish(records, diagnostics, normalizer, config)
    }

    /// Load an export from any byte stream.
    pub fn load_reader<R: Read>(reader: R, config: &EngineConfig) -> Result<Self> {
        let normalizer = Normalizer::new(&config.normalizer)?;
        let rows = RecordReader::from_reader(reader, &config.parser)?;

        let mut diagnostics = Diagnostics::default();
        let records = normalizer.normalize_stream(rows, &mut diagnostics)?;
        Self::finish(records, diagnostics, normalizer, config)
    }

    fn finish(
        records: Vec<NormalizedRecord>,
        diagnostics: Diagnostics,
        normalizer: Normalizer,
        config: &EngineConfig,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(LmtError::EmptyInput {
                rows_read: diagnostics.rows_read,
                rows_skipped: diagnostics.rows_skipped(),
            });
        }
        if diagnostics.rows_skipped() > 0 {
            warn!(
                "{} of {} rows skipped ({} malformed, {} out of range)",
                diagnostics.rows_skipped(),
                diagnostics.rows_read,
                diagnostics.malformed_rows,
                diagnostics.out_of_range_rows
            );
        }
        info!(
            "Dataset ready: {} records from {} rows",
            records.len(),
            diagnostics.rows_read
        );

        Ok(Self {
            records: records.into(),
            diagnostics,
            normalizer: Arc::new(normalizer),
            trend_bucket: config.trend_bucket,
        })
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records matching `filter`, whose identifiers are canonicalized with
    /// the dataset's normalizer settings first.
    pub fn filtered(&self, filter: &FilterSpec) -> Result<Vec<NormalizedRecord>> {
        let filter = self.canonical_filter(filter)?;
        Ok(filter.apply(&self.records))
    }

    /// Re-summarize along one dimension without re-parsing.
    pub fn aggregate(&self, filter: &FilterSpec, dimension: Dimension) -> Result<SummaryTable> {
        let filter = self.canonical_filter(filter)?;
        let records = filter.apply(&self.records);
        let rows = Aggregator::aggregate(&records, dimension);
        Ok(SummaryTable::new(
            SummaryKind::Custom,
            dimension,
            filter,
            Utc::now(),
            rows,
        ))
    }

    /// Build every reporting view for `filter`, with diagnostics attached.
    pub fn summarize(&self, filter: &FilterSpec) -> Result<SummaryReport> {
        let filter = self.canonical_filter(filter)?;
        let records = filter.apply(&self.records);
        debug!(
            "Summarizing {} of {} records",
            records.len(),
            self.records.len()
        );

        let builder = SummaryBuilder::new(self.trend_bucket);
        let mut report = builder.build(&records, &filter, Utc::now());
        report.diagnostics = self.diagnostics.clone();
        Ok(report)
    }

    fn canonical_filter(&self, filter: &FilterSpec) -> Result<FilterSpec> {
        filter.validate()?;
        Ok(self.normalizer.canonicalize_filter(filter))
    }
}

// ── One-shot entry point ──────────────────────────────────────────────────────

/// Parse, normalize, filter and summarize the export at `path`.
pub fn analyze_export(
    path: &Path,
    config: &EngineConfig,
    filter: &FilterSpec,
) -> Result<SummaryReport> {
    Dataset::load_path(path, config)?.summarize(filter)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

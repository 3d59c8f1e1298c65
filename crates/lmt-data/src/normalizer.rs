//! Canonicalization and deduplication of parsed usage records.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use lmt_core::config::NormalizerConfig;
use lmt_core::error::{LmtError, Result};
use lmt_core::models::{Diagnostics, NormalizedRecord, UsageRecord};
use lmt_core::time_utils::{from_canonical, resolve_timezone, to_canonical, TimeBucket};
use regex::Regex;
use tracing::{debug, warn};

use crate::filter::FilterSpec;

/// Turns [`UsageRecord`]s into deduplicated [`NormalizedRecord`]s.
///
/// Built once from a [`NormalizerConfig`]; holds no state between calls.
#[derive(Debug)]
pub struct Normalizer {
    tz: Tz,
    resolution: TimeBucket,
    earliest: NaiveDate,
    latest: NaiveDate,
    server_aliases: BTreeMap<String, String>,
    product_aliases: BTreeMap<String, String>,
    whitespace: Regex,
}

impl Normalizer {
    /// Compile `config`: resolve the time zone, check the resolution and
    /// date range, and flatten the alias maps.
    pub fn new(config: &NormalizerConfig) -> Result<Self> {
        let tz = resolve_timezone(&config.timezone)?;

        if config.resolution == TimeBucket::Month {
            return Err(LmtError::Config(
                "normalizer resolution must be \"day\" or \"hour\"".to_string(),
            ));
        }
        if config.earliest_date > config.latest_date {
            return Err(LmtError::Config(format!(
                "earliest_date {} is after latest_date {}",
                config.earliest_date, config.latest_date
            )));
        }

        let whitespace = Regex::new(r"\s+").expect("regex is valid");
        let server_aliases = compile_aliases(&config.server_aliases, &whitespace, "server")?;
        let product_aliases = compile_aliases(&config.product_aliases, &whitespace, "product")?;

        Ok(Self {
            tz,
            resolution: config.resolution,
            earliest: config.earliest_date,
            latest: config.latest_date,
            server_aliases,
            product_aliases,
            whitespace,
        })
    }

    /// Canonical form of a server identifier, aliases applied.
    pub fn canonical_server(&self, raw: &str) -> String {
        resolve_alias(&self.server_aliases, fold_identifier(raw, &self.whitespace))
    }

    /// Canonical form of a product identifier, aliases applied.
    pub fn canonical_product(&self, raw: &str) -> String {
        resolve_alias(&self.product_aliases, fold_identifier(raw, &self.whitespace))
    }

    /// Canonicalize a single record, rejecting implausible dates.
    pub fn normalize_record(&self, record: &UsageRecord) -> Result<NormalizedRecord> {
        let local = to_canonical(record.timestamp, self.tz);
        let date = local.date();
        if date < self.earliest || date > self.latest {
            return Err(LmtError::OutOfRangeDate {
                row: record.row,
                date,
                earliest: self.earliest,
                latest: self.latest,
            });
        }

        Ok(NormalizedRecord {
            server_id: self.canonical_server(&record.server_id),
            product_id: self.canonical_product(&record.product_id),
            timestamp: self.resolution.truncate(local),
            peak_value: record.peak_value,
            license_count: record.license_count,
        })
    }

    /// Normalize already-parsed records.
    ///
    /// Output is ordered by `(timestamp, server, product)` and holds one
    /// record per key, the one with the highest peak value.
    pub fn normalize<I>(&self, records: I, diagnostics: &mut Diagnostics) -> Vec<NormalizedRecord>
    where
        I: IntoIterator<Item = UsageRecord>,
    {
        let mut merged: BTreeMap<(NaiveDateTime, String, String), NormalizedRecord> =
            BTreeMap::new();

        for record in records {
            let normalized = match self.normalize_record(&record) {
                Ok(n) => n,
                Err(err) => {
                    warn!("Dropping record: {}", err);
                    diagnostics.record_issue(&err);
                    continue;
                }
            };

            let key = (
                normalized.timestamp,
                normalized.server_id.clone(),
                normalized.product_id.clone(),
            );
            match merged.get_mut(&key) {
                Some(existing) => {
                    diagnostics.duplicates_merged += 1;
                    merge_duplicate(existing, normalized);
                }
                None => {
                    merged.insert(key, normalized);
                }
            }
        }

        let out: Vec<NormalizedRecord> = merged.into_values().collect();
        diagnostics.records_normalized += out.len();
        debug!(
            "Normalizer: {} records kept, {} duplicates merged, {} out of range",
            out.len(),
            diagnostics.duplicates_merged,
            diagnostics.out_of_range_rows
        );
        out
    }

    /// Normalize a parser stream, counting rows and row-level errors.
    ///
    /// Fatal (non row-level) errors from the stream abort immediately.
    pub fn normalize_stream<I>(
        &self,
        rows: I,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<NormalizedRecord>>
    where
        I: IntoIterator<Item = Result<UsageRecord>>,
    {
        let mut parsed = Vec::new();
        for row in rows {
            match row {
                Ok(record) => {
                    diagnostics.rows_read += 1;
                    parsed.push(record);
                }
                Err(err) if err.is_row_level() => {
                    diagnostics.rows_read += 1;
                    diagnostics.record_issue(&err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.normalize(parsed, diagnostics))
    }

    /// Express a normalized record as a usage record again, so it can be fed
    /// back through [`Normalizer::normalize`].
    pub fn to_usage_record(&self, record: &NormalizedRecord, row: usize) -> UsageRecord {
        UsageRecord {
            row,
            server_id: record.server_id.clone(),
            product_id: record.product_id.clone(),
            timestamp: from_canonical(record.timestamp, self.tz),
            peak_value: record.peak_value,
            license_count: record.license_count,
        }
    }

    /// Map a filter's identifiers onto the canonical names records carry.
    pub fn canonicalize_filter(&self, filter: &FilterSpec) -> FilterSpec {
        FilterSpec {
            date_from: filter.date_from,
            date_to: filter.date_to,
            servers: filter
                .servers
                .iter()
                .map(|s| self.canonical_server(s))
                .collect(),
            products: filter
                .products
                .iter()
                .map(|p| self.canonical_product(p))
                .collect(),
        }
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Trim, collapse internal whitespace and case-fold.
fn fold_identifier(raw: &str, whitespace: &Regex) -> String {
    whitespace.replace_all(raw.trim(), " ").to_lowercase()
}

fn resolve_alias(aliases: &BTreeMap<String, String>, folded: String) -> String {
    match aliases.get(&folded) {
        Some(target) => target.clone(),
        None => folded,
    }
}

/// Fold alias keys and targets and follow chains, so every target is final.
fn compile_aliases(
    raw: &BTreeMap<String, String>,
    whitespace: &Regex,
    kind: &str,
) -> Result<BTreeMap<String, String>> {
    let folded: BTreeMap<String, String> = raw
        .iter()
        .map(|(from, to)| (fold_identifier(from, whitespace), fold_identifier(to, whitespace)))
        .filter(|(from, to)| from != to)
        .collect();

    let mut compiled = BTreeMap::new();
    for (from, to) in &folded {
        let mut target = to;
        let mut steps = 0;
        while let Some(next) = folded.get(target) {
            steps += 1;
            if steps > folded.len() {
                return Err(LmtError::Config(format!(
                    "{} alias \"{}\" is part of a cycle",
                    kind, from
                )));
            }
            target = next;
        }
        compiled.insert(from.clone(), target.clone());
    }
    Ok(compiled)
}

/// Keep the larger peak; the survivor inherits a license count if it had none.
fn merge_duplicate(existing: &mut NormalizedRecord, incoming: NormalizedRecord) {
    let best_license = match (existing.license_count, incoming.license_count) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    if incoming.peak_value > existing.peak_value {
        *existing = incoming;
    }
    if existing.license_count.is_none() {
        existing.license_count = best_license;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! User-selected restrictions applied to normalized records before
//! aggregation.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use lmt_core::error::{LmtError, Result};
use lmt_core::models::NormalizedRecord;
use serde::{Deserialize, Serialize};

/// Date range, server subset and product subset; every part optional.
///
/// An empty set means "no restriction", never "match nothing". Identifiers
/// are compared against canonical record identifiers, so pass a filter
/// through [`crate::normalizer::Normalizer::canonicalize_filter`] first when
/// it holds user-typed names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// Inclusive lower bound on the record's bucket date.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the record's bucket date.
    pub date_to: Option<NaiveDate>,
    pub servers: BTreeSet<String>,
    pub products: BTreeSet<String>,
}

impl FilterSpec {
    /// `true` when the filter places no restriction at all.
    pub fn is_unrestricted(&self) -> bool {
        self.date_from.is_none()
            && self.date_to.is_none()
            && self.servers.is_empty()
            && self.products.is_empty()
    }

    /// Reject a date range whose start lies after its end.
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(LmtError::Config(format!(
                    "filter date_from {} is after date_to {}",
                    from, to
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, record: &NormalizedRecord) -> bool {
        let date = record.timestamp.date();
        if self.date_from.is_some_and(|from| date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| date > to) {
            return false;
        }
        if !self.servers.is_empty() && !self.servers.contains(&record.server_id) {
            return false;
        }
        if !self.products.is_empty() && !self.products.contains(&record.product_id) {
            return false;
        }
        true
    }

    /// The matching subsequence of `records`, order preserved.
    pub fn apply(&self, records: &[NormalizedRecord]) -> Vec<NormalizedRecord> {
        records
            .iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

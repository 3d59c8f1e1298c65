//! Grouping of normalized records and per-group statistics.

use std::collections::BTreeMap;

use lmt_core::error::Result;
use lmt_core::models::{
    Dimension, GroupKey, GroupStatistics, NormalizedRecord, Observation, Utilization,
};
use tracing::debug;

// ── Accumulator ───────────────────────────────────────────────────────────────

/// Running totals for one group.
#[derive(Debug, Clone)]
struct Accumulator {
    count: u64,
    sum: f64,
    max: Observation,
    min: Observation,
    licensed: u64,
    ratio_sum: f64,
    ratio_max: f64,
    over_consumption: u64,
}

impl Accumulator {
    fn new(record: &NormalizedRecord) -> Self {
        let mut acc = Self {
            count: 0,
            sum: 0.0,
            max: Observation::of(record),
            min: Observation::of(record),
            licensed: 0,
            ratio_sum: 0.0,
            ratio_max: 0.0,
            over_consumption: 0,
        };
        acc.add(record);
        acc
    }

    /// Fold `record` into the totals.
    ///
    /// On equal peaks the earlier timestamp wins; equal timestamps keep the
    /// record seen first.
    fn add(&mut self, record: &NormalizedRecord) {
        self.count += 1;
        self.sum += record.peak_value;

        let value = record.peak_value;
        if value > self.max.value
            || (value == self.max.value && record.timestamp < self.max.timestamp)
        {
            self.max = Observation::of(record);
        }
        if value < self.min.value
            || (value == self.min.value && record.timestamp < self.min.timestamp)
        {
            self.min = Observation::of(record);
        }

        if let Some(ratio) = record.utilization() {
            self.licensed += 1;
            self.ratio_sum += ratio;
            self.ratio_max = self.ratio_max.max(ratio);
            if ratio > 1.0 {
                self.over_consumption += 1;
            }
        }
    }

    fn finish(self, key: GroupKey, dimension: Dimension) -> GroupStatistics {
        let utilization = (self.licensed > 0).then(|| Utilization {
            licensed_records: self.licensed,
            peak_ratio: self.ratio_max,
            mean_ratio: self.ratio_sum / self.licensed as f64,
            over_consumption: self.over_consumption,
        });

        GroupStatistics {
            label: key.label(dimension.bucket()),
            key,
            count: self.count,
            sum: self.sum,
            mean: self.sum / self.count as f64,
            max: self.max,
            min: self.min,
            utilization,
        }
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Stateless helper that partitions records and computes [`GroupStatistics`].
pub struct Aggregator;

impl Aggregator {
    /// Group `records` along `dimension` in a single pass.
    ///
    /// Rows come back in [`GroupKey`] order: identifiers ascending, buckets
    /// chronological. An empty input gives an empty result.
    pub fn aggregate(records: &[NormalizedRecord], dimension: Dimension) -> Vec<GroupStatistics> {
        let mut groups: BTreeMap<GroupKey, Accumulator> = BTreeMap::new();

        for record in records {
            let key = dimension.key_for(record);
            match groups.get_mut(&key) {
                Some(acc) => acc.add(record),
                None => {
                    groups.insert(key, Accumulator::new(record));
                }
            }
        }

        debug!(
            "Aggregator: {} records into {} groups by {}",
            records.len(),
            groups.len(),
            dimension
        );

        groups
            .into_iter()
            .map(|(key, acc)| acc.finish(key, dimension))
            .collect()
    }

    /// Like [`Aggregator::aggregate`], with the dimension given by name.
    ///
    /// Fails with `EmptyGroup` when the name is not a known dimension.
    pub fn aggregate_named(records: &[NormalizedRecord], name: &str) -> Result<Vec<GroupStatistics>> {
        let dimension: Dimension = name.parse()?;
        Ok(Self::aggregate(records, dimension))
    }

    /// Sum of the group counts.
    pub fn total_count(groups: &[GroupStatistics]) -> u64 {
        groups.iter().map(|g| g.count).sum()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use lmt_core::error::LmtError;
    use lmt_core::time_utils::TimeBucket;

    fn at(m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn rec(server: &str, product: &str, ts: NaiveDateTime, peak: f64) -> NormalizedRecord {
        NormalizedRecord {
            server_id: server.to_string(),
            product_id: product.to_string(),
            timestamp: ts,
            peak_value: peak,
            license_count: None,
        }
    }

    fn licensed(mut r: NormalizedRecord, licenses: u64) -> NormalizedRecord {
        r.license_count = Some(licenses);
        r
    }

    fn sample() -> Vec<NormalizedRecord> {
        vec![
            rec("a", "x", at(1, 1), 10.0),
            rec("b", "x", at(1, 1), 30.0),
            rec("c", "x", at(1, 1), 20.0),
            rec("a", "y", at(1, 2), 5.0),
            rec("a", "x", at(2, 3), 12.0),
        ]
    }

    // ── max attribution ───────────────────────────────────────────────────────

    #[test]
    fn test_per_product_max_attributed_to_server() {
        let records = vec![
            rec("a", "x", at(1, 1), 10.0),
            rec("b", "x", at(1, 1), 30.0),
            rec("c", "x", at(1, 1), 20.0),
        ];
        let groups = Aggregator::aggregate(&records, Dimension::Product);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, GroupKey::Product("x".into()));
        assert_eq!(groups[0].max.value, 30.0);
        assert_eq!(groups[0].max.server_id, "b");
        assert_eq!(groups[0].min.value, 10.0);
        assert_eq!(groups[0].min.server_id, "a");
    }

    #[test]
    fn test_max_tie_earliest_timestamp_wins() {
        let records = vec![
            rec("b", "x", at(1, 5), 40.0),
            rec("a", "x", at(1, 9), 40.0),
            rec("c", "x", at(1, 2), 40.0),
        ];
        let groups = Aggregator::aggregate(&records, Dimension::Product);
        assert_eq!(groups[0].max.timestamp, at(1, 2));
        assert_eq!(groups[0].max.server_id, "c");
        assert_eq!(groups[0].min.timestamp, at(1, 2));
    }

    #[test]
    fn test_max_tie_same_timestamp_keeps_first() {
        let records = vec![rec("a", "x", at(1, 1), 7.0), rec("b", "x", at(1, 1), 7.0)];
        let groups = Aggregator::aggregate(&records, Dimension::Product);
        assert_eq!(groups[0].max.server_id, "a");
    }

    // ── basic statistics ──────────────────────────────────────────────────────

    #[test]
    fn test_count_sum_mean() {
        let groups = Aggregator::aggregate(&sample(), Dimension::Server);
        let a = &groups[0];
        assert_eq!(a.key, GroupKey::Server("a".into()));
        assert_eq!(a.count, 3);
        assert!((a.sum - 27.0).abs() < 1e-9);
        assert!((a.mean - 9.0).abs() < 1e-9);
        assert_eq!(a.max.value, 12.0);
        assert_eq!(a.max.timestamp, at(2, 3));
        assert_eq!(a.min.value, 5.0);
    }

    #[test]
    fn test_rows_sorted_by_identifier() {
        let groups = Aggregator::aggregate(&sample(), Dimension::Server);
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_server_product_dimension() {
        let groups = Aggregator::aggregate(&sample(), Dimension::ServerProduct);
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["a / x", "a / y", "b / x", "c / x"]);
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn test_time_bucket_dimension_chronological() {
        let groups = Aggregator::aggregate(&sample(), Dimension::TimeBucket(TimeBucket::Month));
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-01", "2024-02"]);
        assert_eq!(groups[0].count, 4);
        assert_eq!(groups[0].max.server_id, "b");
    }

    #[test]
    fn test_product_trend_dimension() {
        let groups = Aggregator::aggregate(&sample(), Dimension::ProductTrend(TimeBucket::Day));
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["x @ 2024-01-01", "x @ 2024-02-03", "y @ 2024-01-02"]
        );
    }

    #[test]
    fn test_overall_dimension() {
        let groups = Aggregator::aggregate(&sample(), Dimension::Overall);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 5);
        assert_eq!(groups[0].max.value, 30.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(Aggregator::aggregate(&[], Dimension::Server).is_empty());
    }

    // ── counts property ───────────────────────────────────────────────────────

    #[test]
    fn test_group_counts_sum_to_record_count() {
        let records = sample();
        let dimensions = [
            Dimension::Overall,
            Dimension::Server,
            Dimension::Product,
            Dimension::ServerProduct,
            Dimension::TimeBucket(TimeBucket::Hour),
            Dimension::TimeBucket(TimeBucket::Day),
            Dimension::TimeBucket(TimeBucket::Month),
            Dimension::ProductTrend(TimeBucket::Month),
        ];
        for dimension in dimensions {
            let groups = Aggregator::aggregate(&records, dimension);
            assert_eq!(
                Aggregator::total_count(&groups),
                records.len() as u64,
                "dimension {}",
                dimension
            );
        }
    }

    // ── utilization ───────────────────────────────────────────────────────────

    #[test]
    fn test_utilization_only_from_licensed_records() {
        let records = vec![
            licensed(rec("a", "x", at(1, 1), 15.0), 10),
            licensed(rec("a", "x", at(1, 2), 5.0), 10),
            rec("a", "x", at(1, 3), 99.0),
            licensed(rec("a", "x", at(1, 4), 3.0), 0),
        ];
        let groups = Aggregator::aggregate(&records, Dimension::ServerProduct);
        let util = groups[0].utilization.as_ref().unwrap();
        assert_eq!(util.licensed_records, 2);
        assert!((util.peak_ratio - 1.5).abs() < 1e-9);
        assert!((util.mean_ratio - 1.0).abs() < 1e-9);
        assert_eq!(util.over_consumption, 1);
    }

    #[test]
    fn test_no_utilization_without_licenses() {
        let groups = Aggregator::aggregate(&sample(), Dimension::Server);
        assert!(groups.iter().all(|g| g.utilization.is_none()));
    }

    // ── aggregate_named ───────────────────────────────────────────────────────

    #[test]
    fn test_aggregate_named() {
        let groups = Aggregator::aggregate_named(&sample(), "by-product").unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_aggregate_named_unknown_dimension() {
        let err = Aggregator::aggregate_named(&sample(), "by-colour").unwrap_err();
        assert!(matches!(err, LmtError::EmptyGroup(_)));
    }

    #[test]
    fn test_aggregate_named_unknown_dimension_even_when_empty() {
        assert!(Aggregator::aggregate_named(&[], "nonsense").is_err());
        assert!(Aggregator::aggregate_named(&[], "server").unwrap().is_empty());
    }
}

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use lmt_core::config::EngineConfig;
use lmt_core::error::Result;
use lmt_core::models::Dimension;
use lmt_core::time_utils::TimeBucket;
use lmt_data::filter::FilterSpec;

// ── Args ───────────────────────────────────────────────────────────────────────

/// License usage statistics for LMT exports
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lmt-stats",
    about = "License usage statistics for LMT exports",
    version
)]
pub struct Args {
    /// Export file, or a directory searched recursively for *.csv exports
    pub path: PathBuf,

    /// JSON engine configuration (default: ~/.lmt-stats/config.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Restrict to a server; repeat for several
    #[arg(long = "server")]
    pub servers: Vec<String>,

    /// Restrict to a product; repeat for several
    #[arg(long = "product")]
    pub products: Vec<String>,

    /// Print a single table grouped by this dimension instead of the full report
    #[arg(long)]
    pub group_by: Option<String>,

    /// Bucket for the trend tables
    #[arg(long, value_parser = ["hour", "day", "month"])]
    pub bucket: Option<String>,

    /// Time zone records are bucketed in
    #[arg(long)]
    pub timezone: Option<String>,

    /// Single-line JSON output
    #[arg(long)]
    pub compact: bool,

    /// Logging level
    #[arg(long, default_value = "WARNING", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,
}

impl Args {
    pub fn filter_spec(&self) -> FilterSpec {
        FilterSpec {
            date_from: self.from,
            date_to: self.to,
            servers: self.servers.iter().cloned().collect(),
            products: self.products.iter().cloned().collect(),
        }
    }

    /// Layer the command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut EngineConfig) -> Result<()> {
        if let Some(bucket) = &self.bucket {
            config.trend_bucket = bucket.parse::<TimeBucket>()?;
        }
        if let Some(tz) = &self.timezone {
            config.normalizer.timezone = tz.clone();
        }
        Ok(())
    }

    /// The `--group-by` dimension, if one was asked for.
    pub fn dimension(&self) -> Result<Option<Dimension>> {
        self.group_by.as_deref().map(str::parse).transpose()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lmt_core::error::LmtError;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["lmt-stats"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).expect("arguments should parse")
    }

    // ── parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_defaults() {
        let args = parse(&["export.csv"]);
        assert_eq!(args.path, PathBuf::from("export.csv"));
        assert!(args.config.is_none());
        assert!(args.group_by.is_none());
        assert!(!args.compact);
        assert_eq!(args.log_level, "WARNING");
    }

    #[test]
    fn test_path_is_required() {
        assert!(Args::try_parse_from(["lmt-stats"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_bucket() {
        assert!(Args::try_parse_from(["lmt-stats", "x.csv", "--bucket", "week"]).is_err());
    }

    #[test]
    fn test_rejects_bad_date() {
        assert!(Args::try_parse_from(["lmt-stats", "x.csv", "--from", "01/02/2024"]).is_err());
    }

    // ── filter_spec ───────────────────────────────────────────────────────────

    #[test]
    fn test_filter_spec_from_flags() {
        let args = parse(&[
            "x.csv",
            "--from",
            "2024-01-01",
            "--to",
            "2024-01-31",
            "--server",
            "alpha",
            "--server",
            "beta",
            "--product",
            "cad",
        ]);
        let filter = args.filter_spec();
        assert_eq!(filter.date_from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(filter.date_to, NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(filter.servers.len(), 2);
        assert!(filter.products.contains("cad"));
    }

    #[test]
    fn test_no_flags_means_unrestricted_filter() {
        assert!(parse(&["x.csv"]).filter_spec().is_unrestricted());
    }

    // ── apply_overrides ───────────────────────────────────────────────────────

    #[test]
    fn test_apply_overrides() {
        let args = parse(&["x.csv", "--bucket", "month", "--timezone", "Europe/Berlin"]);
        let mut config = EngineConfig::default();
        args.apply_overrides(&mut config).unwrap();
        assert_eq!(config.trend_bucket, TimeBucket::Month);
        assert_eq!(config.normalizer.timezone, "Europe/Berlin");
    }

    #[test]
    fn test_apply_overrides_keeps_config_when_absent() {
        let args = parse(&["x.csv"]);
        let mut config = EngineConfig::default();
        config.trend_bucket = TimeBucket::Hour;
        args.apply_overrides(&mut config).unwrap();
        assert_eq!(config.trend_bucket, TimeBucket::Hour);
        assert_eq!(config.normalizer.timezone, EngineConfig::default().normalizer.timezone);
    }

    // ── dimension ─────────────────────────────────────────────────────────────

    #[test]
    fn test_dimension() {
        assert_eq!(parse(&["x.csv"]).dimension().unwrap(), None);
        assert_eq!(
            parse(&["x.csv", "--group-by", "by-server"]).dimension().unwrap(),
            Some(Dimension::Server)
        );
        let err = parse(&["x.csv", "--group-by", "colour"]).dimension().unwrap_err();
        assert!(matches!(err, LmtError::EmptyGroup(_)));
    }
}

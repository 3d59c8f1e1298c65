use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LmtError, Result};

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

/// Resolve an IANA timezone name, with `"auto"` meaning the system zone.
pub fn resolve_timezone(name: &str) -> Result<Tz> {
    let name = name.trim();
    let resolved = if name.eq_ignore_ascii_case("auto") {
        get_system_timezone()
    } else {
        name.to_string()
    };
    resolved
        .parse::<Tz>()
        .map_err(|_| LmtError::Config(format!("unknown timezone \"{}\"", resolved)))
}

// ── TimeBucket ────────────────────────────────────────────────────────────────

/// Fixed-granularity interval used to bucket observations.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Hour,
    #[default]
    Day,
    Month,
}

impl TimeBucket {
    /// Round `ts` down to the start of its bucket.
    pub fn truncate(self, ts: NaiveDateTime) -> NaiveDateTime {
        let date = ts.date();
        match self {
            TimeBucket::Hour => date.and_hms_opt(ts.hour(), 0, 0).unwrap_or(ts),
            TimeBucket::Day => date.and_hms_opt(0, 0, 0).unwrap_or(ts),
            TimeBucket::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or(ts),
        }
    }

    /// Period label for a bucket start, e.g. `"2024-01-15"` or `"2024-01"`.
    pub fn label(self, bucket_start: NaiveDateTime) -> String {
        match self {
            TimeBucket::Hour => bucket_start.format("%Y-%m-%d %H:00").to_string(),
            TimeBucket::Day => bucket_start.format("%Y-%m-%d").to_string(),
            TimeBucket::Month => bucket_start.format("%Y-%m").to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeBucket::Hour => "hour",
            TimeBucket::Day => "day",
            TimeBucket::Month => "month",
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = LmtError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hourly" => Ok(TimeBucket::Hour),
            "day" | "daily" => Ok(TimeBucket::Day),
            "month" | "monthly" => Ok(TimeBucket::Month),
            other => Err(LmtError::Config(format!("unknown time bucket \"{}\"", other))),
        }
    }
}

// ── Timestamp parsing ─────────────────────────────────────────────────────────

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Parses export timestamps, interpreting naive values in a source zone.
#[derive(Debug, Clone, Copy)]
pub struct TimestampParser {
    source_tz: Tz,
}

impl TimestampParser {
    pub fn new(source_tz: Tz) -> Self {
        Self { source_tz }
    }

    /// Parse `s` into a UTC [`DateTime`].
    ///
    /// Accepts RFC 3339 (with `Z` or an offset), the common naive date-time
    /// layouts and date-only values. Returns `None` for empty or unrecognised
    /// input, and for local times that do not exist in the source zone.
    pub fn parse(&self, s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }

        for fmt in DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return self.localize(naive);
            }
        }
        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
                return self.localize(date.and_hms_opt(0, 0, 0)?);
            }
        }

        debug!("TimestampParser: could not parse timestamp \"{}\"", s);
        None
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.source_tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Express a UTC instant as wall-clock time in `tz`.
pub fn to_canonical(ts: DateTime<Utc>, tz: Tz) -> NaiveDateTime {
    ts.with_timezone(&tz).naive_local()
}

/// Inverse of [`to_canonical`].
///
/// A local time skipped by a DST gap (a day bucket in a zone that springs
/// forward at midnight, say) maps to the first valid instant after it, so the
/// result still falls in the same local day and hour bucket.
pub fn from_canonical(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    (0..=GAP_STEPS)
        .find_map(|step| {
            tz.from_local_datetime(&(local + Duration::minutes(GAP_STEP_MINUTES * step)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

// DST gaps are 30 or 60 minutes; probing two hours ahead covers them all.
const GAP_STEP_MINUTES: i64 = 30;
const GAP_STEPS: i64 = 4;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    // ── resolve_timezone ──────────────────────────────────────────────────────

    #[test]
    fn test_resolve_timezone_valid() {
        assert_eq!(resolve_timezone("Europe/Prague").unwrap(), Tz::Europe__Prague);
        assert_eq!(resolve_timezone("UTC").unwrap(), Tz::UTC);
    }

    #[test]
    fn test_resolve_timezone_invalid_is_config_error() {
        let err = resolve_timezone("Not/AZone").unwrap_err();
        assert!(matches!(err, LmtError::Config(_)));
    }

    #[test]
    fn test_resolve_timezone_auto() {
        match get_system_timezone().parse::<Tz>() {
            Ok(system) => assert_eq!(resolve_timezone("auto").unwrap(), system),
            Err(_) => assert!(resolve_timezone("auto").is_err()),
        }
    }

    // ── TimeBucket ────────────────────────────────────────────────────────────

    #[test]
    fn test_truncate_day() {
        let ts = naive("2024-03-05 17:45:12");
        assert_eq!(TimeBucket::Day.truncate(ts), naive("2024-03-05 00:00:00"));
    }

    #[test]
    fn test_truncate_hour() {
        let ts = naive("2024-03-05 17:45:12");
        assert_eq!(TimeBucket::Hour.truncate(ts), naive("2024-03-05 17:00:00"));
    }

    #[test]
    fn test_truncate_month() {
        let ts = naive("2024-03-25 17:45:12");
        assert_eq!(TimeBucket::Month.truncate(ts), naive("2024-03-01 00:00:00"));
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let ts = naive("2024-03-25 17:45:12");
        for bucket in [TimeBucket::Hour, TimeBucket::Day, TimeBucket::Month] {
            let once = bucket.truncate(ts);
            assert_eq!(bucket.truncate(once), once);
        }
    }

    #[test]
    fn test_labels() {
        let ts = naive("2024-03-05 17:00:00");
        assert_eq!(TimeBucket::Hour.label(ts), "2024-03-05 17:00");
        assert_eq!(TimeBucket::Day.label(ts), "2024-03-05");
        assert_eq!(TimeBucket::Month.label(ts), "2024-03");
    }

    #[test]
    fn test_bucket_from_str() {
        assert_eq!("daily".parse::<TimeBucket>().unwrap(), TimeBucket::Day);
        assert_eq!(" Month ".parse::<TimeBucket>().unwrap(), TimeBucket::Month);
        assert!("fortnight".parse::<TimeBucket>().is_err());
    }

    #[test]
    fn test_bucket_serde_lowercase() {
        let json = serde_json::to_string(&TimeBucket::Month).unwrap();
        assert_eq!(json, "\"month\"");
        let back: TimeBucket = serde_json::from_str("\"hour\"").unwrap();
        assert_eq!(back, TimeBucket::Hour);
    }

    // ── TimestampParser ───────────────────────────────────────────────────────

    #[test]
    fn test_parse_rfc3339_z_suffix() {
        let p = TimestampParser::new(Tz::UTC);
        let dt = p.parse("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn test_parse_with_offset_ignores_source_zone() {
        let p = TimestampParser::new(Tz::Asia__Tokyo);
        let dt = p.parse("2024-01-15T10:30:00+02:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T08:30:00+00:00");
    }

    #[test]
    fn test_parse_naive_uses_source_zone() {
        let p = TimestampParser::new(Tz::Europe__Prague);
        let dt = p.parse("2024-01-15 10:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T09:00:00+00:00");
    }

    #[test]
    fn test_parse_date_only_formats() {
        let p = TimestampParser::new(Tz::UTC);
        let expected = "2024-01-15T00:00:00+00:00";
        assert_eq!(p.parse("2024-01-15").unwrap().to_rfc3339(), expected);
        assert_eq!(p.parse("01/15/2024").unwrap().to_rfc3339(), expected);
        assert_eq!(p.parse("15.01.2024").unwrap().to_rfc3339(), expected);
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        let p = TimestampParser::new(Tz::UTC);
        assert!(p.parse("").is_none());
        assert!(p.parse("   ").is_none());
        assert!(p.parse("yesterday").is_none());
        assert!(p.parse("2024-13-45").is_none());
    }

    // ── canonical conversion ──────────────────────────────────────────────────

    #[test]
    fn test_canonical_round_trip() {
        let tz = Tz::America__New_York;
        let utc = Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap();
        let local = to_canonical(utc, tz);
        assert_eq!(local, naive("2024-05-31 23:00:00"));
        assert_eq!(from_canonical(local, tz), utc);
    }

    #[test]
    fn test_from_canonical_midnight_dst_gap() {
        // Santiago springs forward from 00:00 to 01:00 on 2024-09-08.
        let tz = Tz::America__Santiago;
        let midnight = naive("2024-09-08 00:00:00");
        let utc = from_canonical(midnight, tz);
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 9, 8, 4, 0, 0).unwrap());
        assert_eq!(to_canonical(utc, tz).date(), midnight.date());
    }

    #[test]
    fn test_parse_naive_in_dst_gap_is_rejected() {
        let p = TimestampParser::new(Tz::Europe__Prague);
        assert!(p.parse("2024-03-31 02:30:00").is_none());
        assert!(p.parse("2024-03-31 03:30:00").is_some());
    }
}

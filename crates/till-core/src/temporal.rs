//! # Temporal Indexer
//!
//! Derives the date partition fields a sale is enriched with at creation.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              Temporal Indexer (pure function)                           │
//! │                                                                         │
//! │  caller-supplied timestamp                                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DateParts {                                                            │
//! │      timestamp_ms   epoch milliseconds                                  │
//! │      iso_date       "2026-08-06"                                        │
//! │      year           2026                                                │
//! │      month          1-12                                                │
//! │      day_of_year    0-based from Jan 1                                  │
//! │  }                                                                      │
//! │                                                                         │
//! │  Applied ONCE at creation. The timestamp is the caller's: backfilled    │
//! │  and imported sales keep their own date, never "now".                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Datelike, TimeZone};
use serde::{Deserialize, Serialize};

/// Derived date partitions for a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateParts {
    pub timestamp_ms: i64,
    /// ISO calendar date, `YYYY-MM-DD`, in the timestamp's own timezone.
    pub iso_date: String,
    pub year: i32,
    /// 1-12.
    pub month: u32,
    /// 0-based from Jan 1 of `year`.
    pub day_of_year: u32,
}

impl DateParts {
    /// Derives partitions from a timestamp, in that timestamp's timezone.
    ///
    /// The calendar fields follow the zone of `ts`; the engine passes local
    /// time so "today" matches the device's calendar day.
    pub fn from_datetime<Tz: TimeZone>(ts: &DateTime<Tz>) -> Self {
        DateParts {
            timestamp_ms: ts.timestamp_millis(),
            iso_date: format!("{:04}-{:02}-{:02}", ts.year(), ts.month(), ts.day()),
            year: ts.year(),
            month: ts.month(),
            day_of_year: ts.ordinal0(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_jan_first_is_day_zero() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 9, 30, 0).unwrap();
        let parts = DateParts::from_datetime(&ts);
        assert_eq!(parts.day_of_year, 0);
        assert_eq!(parts.year, 2026);
        assert_eq!(parts.month, 1);
        assert_eq!(parts.iso_date, "2026-01-01");
    }

    #[test]
    fn test_honors_backfilled_timestamp() {
        // An imported sale keeps its own date, whatever "now" is.
        let ts = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let parts = DateParts::from_datetime(&ts);
        assert_eq!(parts.iso_date, "2025-12-31");
        assert_eq!(parts.year, 2025);
        assert_eq!(parts.month, 12);
        assert_eq!(parts.day_of_year, 364);
        assert_eq!(parts.timestamp_ms, ts.timestamp_millis());
    }

    #[test]
    fn test_leap_year_ordinal() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(DateParts::from_datetime(&ts).day_of_year, 365);
    }
}

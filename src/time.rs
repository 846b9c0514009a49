//! Command-line time arguments
//!
//! Accepted forms, all UTC: `now`, `m/d/yyyy`, `m/d/yyyyTh:m` and
//! `m/d/yyyyTh:m:s`. Values are milliseconds since the epoch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::{MooringError, Result};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a time argument relative to `now`.
pub fn parse_time_at(text: &str, now: DateTime<Utc>) -> Result<i64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("now") {
        return Ok(now.timestamp_millis());
    }

    let parsed = if text.contains('T') {
        NaiveDateTime::parse_from_str(text, "%m/%d/%YT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%m/%d/%YT%H:%M"))
            .ok()
    } else {
        NaiveDate::parse_from_str(text, "%m/%d/%Y").ok().and_then(|d| d.and_hms_opt(0, 0, 0))
    };

    parsed.map(|t| t.and_utc().timestamp_millis()).ok_or_else(|| {
        MooringError::invalid_argument(format!(
            "cannot parse time '{}'; use now, m/d/yyyy, m/d/yyyyTh:m or m/d/yyyyTh:m:s",
            text
        ))
    })
}

pub fn parse_time(text: &str) -> Result<i64> {
    parse_time_at(text, Utc::now())
}

/// Render epoch milliseconds for log and status lines.
pub fn format_millis(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%m/%d/%YT%H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

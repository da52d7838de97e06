//! Calendar conversions for the fractional-day time axis.
//!
//! All pipeline time values are days since 1970-01-01 00:00:00 UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Parses `YYYY-MM-DD[THH:MM[:SS]]` into fractional days since the epoch.
pub fn from_iso(s: &str) -> Option<f64> {
    let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(dt.and_utc().timestamp() as f64 / SECONDS_PER_DAY)
}

/// Formats fractional days as `YYYY-MM-DDTHH:MM:SS`, rounded to the
/// nearest second.
pub fn to_iso(t: f64) -> String {
    let secs = (t * SECONDS_PER_DAY).round() as i64;
    match DateTime::from_timestamp(secs, 0) {
        Some(dt) => dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => format!("{}", t),
    }
}

/// Output file stem for a period starting at `t`: the ISO timestamp with
/// colons stripped.
pub fn file_stem(t: f64) -> String {
    to_iso(t).replace(':', "")
}

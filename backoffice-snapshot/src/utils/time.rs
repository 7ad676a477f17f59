//! Timestamp helpers. Everything is stored and exported as RFC 3339.

use chrono::{DateTime, NaiveDateTime, Utc};

pub fn now_rfc3339() -> String {
    to_rfc3339(&Utc::now())
}

pub fn to_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parses RFC 3339, or a naive ISO-8601 / SQLite `datetime()` value taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Canonical form of a stored timestamp, or `None` if it cannot be parsed.
pub fn normalize(value: &str) -> Option<String> {
    parse_timestamp(value).map(|ts| to_rfc3339(&ts))
}

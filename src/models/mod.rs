use chrono::{DateTime, SecondsFormat, Utc};

pub mod analytics;
pub mod cms;
pub mod portfolio;

/// Timestamps are stored as RFC 3339 UTC strings with a `Z` suffix so that
/// both backends can compare them lexically.
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

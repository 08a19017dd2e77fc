//! Canonical timestamp rendering.
//!
//! Every persisted or scripted timestamp goes through [`format_timestamp`] so that
//! a value read back from the store renders to exactly the same text.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Current time truncated to the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}

/// Drop sub-microsecond precision.
pub fn truncate(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = timestamp.timestamp_subsec_nanos();
    timestamp - chrono::Duration::nanoseconds(i64::from(nanos % 1_000))
}

/// Convert provider epoch-seconds into a UTC timestamp.
pub fn from_epoch_seconds(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
}

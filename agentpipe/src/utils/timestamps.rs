//! Timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an RFC 3339 string with millisecond
/// precision, e.g. `2024-05-01T12:00:00.123Z`.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds elapsed between two timestamps, clamped at zero.
#[must_use]
pub fn millis_between(start: Timestamp, end: Timestamp) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

//! Timestamp helpers
//!
//! All persisted timestamps are unix epoch milliseconds (INTEGER columns).

use chrono::{DateTime, TimeZone, Utc};

/// Current time as unix epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored epoch milliseconds into a UTC datetime
///
/// Out-of-range values clamp to the unix epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
}

/// RFC 3339 rendering of stored epoch milliseconds (seconds precision)
pub fn millis_to_rfc3339(ms: i64) -> String {
    from_millis(ms).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

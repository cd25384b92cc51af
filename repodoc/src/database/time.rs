//! Timestamp helpers for the database layer.
//!
//! Job records carry RFC 3339 strings (they are shown to clients verbatim);
//! task-queue rows use `INTEGER` Unix epoch milliseconds so lease arithmetic
//! stays in SQL.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as an RFC 3339 string with millisecond precision.
#[inline]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`, clamping out-of-range values.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None if ms.is_negative() => DateTime::<Utc>::MIN_UTC,
        chrono::LocalResult::None => DateTime::<Utc>::MAX_UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_parses_back() {
        let s = now_rfc3339();
        assert!(DateTime::parse_from_rfc3339(&s).is_ok());
        assert!(s.ends_with('Z'));
    }

    #[test]
    fn out_of_range_millis_clamp() {
        assert_eq!(ms_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(ms_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
        assert_eq!(ms_to_datetime(0).timestamp(), 0);
    }
}

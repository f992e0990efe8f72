//! Wall-clock helpers.

use std::time::Duration;
use time::OffsetDateTime;

/// Current UTC time.
#[inline]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// `at + by`, clamped to the largest representable timestamp.
pub fn saturating_add(at: OffsetDateTime, by: Duration) -> OffsetDateTime {
    at.saturating_add(time::Duration::try_from(by).unwrap_or(time::Duration::MAX))
}

/// `at - by`, clamped to the smallest representable timestamp.
pub fn saturating_sub(at: OffsetDateTime, by: Duration) -> OffsetDateTime {
    at.saturating_sub(time::Duration::try_from(by).unwrap_or(time::Duration::MAX))
}

/// Nanoseconds since the Unix epoch, saturated to `i64`.
///
/// Sorted-set scores in the rate limiter use this resolution.
pub fn unix_nanos(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

//! # Timestamps and Due-Checks
//!
//! Poll timestamps are stored as text in a fixed UTC format. Reading them
//! back is more lenient: hierarchical stores tend to hand back their own
//! date-and-time rendering (`+00:00` offsets, fractional seconds).
//!
//! ## Duration Units
//! `duration` in [`crate::PollStats`] is `(end - start)` scaled by
//! [`DURATION_UNITS_PER_SECOND`] and truncated. The scale is kept so existing
//! dashboards reading the stored value keep working.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{CoreError, CoreResult};

/// Textual format used for every stored poll timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Stored `duration` units per elapsed second.
pub const DURATION_UNITS_PER_SECOND: i64 = 100;

/// Formats a timestamp for storage.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored timestamp.
///
/// Accepts RFC 3339 (`Z` or numeric offset, optional fractional seconds) and
/// offset-less `YYYY-MM-DDTHH:MM:SS[.fff]`, which is taken as UTC.
///
/// ```rust
/// use mapcache_core::time::parse_timestamp;
///
/// let a = parse_timestamp("2018-02-20T13:15:14Z").unwrap();
/// let b = parse_timestamp("2018-02-20T13:15:14+00:00").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn parse_timestamp(value: &str) -> CoreResult<DateTime<Utc>> {
    let trimmed = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CoreError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Converts an elapsed window into stored duration units.
///
/// Truncates toward zero; a negative window (clock step) yields 0.
pub fn duration_units(start: &DateTime<Utc>, end: &DateTime<Utc>) -> u64 {
    let elapsed_ms = (*end - *start).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0;
    }
    (elapsed_ms * DURATION_UNITS_PER_SECOND / 1000) as u64
}

/// Decides whether a binding is due for a refresh.
///
/// - Never polled (`last_start` is `None`) → due
/// - Otherwise due strictly after `last_start + interval_secs`
pub fn is_due(last_start: Option<&DateTime<Utc>>, interval_secs: u64, now: &DateTime<Utc>) -> bool {
    match last_start {
        None => true,
        Some(start) => {
            let secs = interval_secs.min(crate::MAX_UPDATE_INTERVAL_SECS) as i64;
            match start.checked_add_signed(chrono::Duration::seconds(secs)) {
                Some(next_due) => *now > next_due,
                None => false,
            }
        }
    }
}

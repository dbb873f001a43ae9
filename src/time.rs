//! Integer timestamp arithmetic and split-key derivation.
//!
//! All timestamps are nanoseconds since the Unix epoch, all durations are
//! signed nanoseconds. Time arithmetic never goes through floating point.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Signed nanoseconds.
pub type Duration = i64;

pub const SECOND: Duration = 1_000_000_000;
pub const MINUTE: Duration = 60 * SECOND;
pub const HOUR: Duration = 60 * MINUTE;
pub const DAY: Duration = 24 * HOUR;

/// Default number of aggregated points carried by one split.
pub const POINTS_PER_SPLIT: u32 = 3600;

/// Rounds `ts` down to a multiple of `granularity`.
///
/// Negative timestamps round toward negative infinity, so buckets stay
/// aligned on both sides of the epoch.
pub fn round_timestamp(ts: Timestamp, granularity: Duration) -> Timestamp {
    ts - ts.rem_euclid(granularity)
}

/// Renders a timestamp as UTC for log events and error messages.
pub fn format_timestamp(ts: Timestamp) -> String {
    match DateTime::from_timestamp(ts.div_euclid(SECOND), ts.rem_euclid(SECOND) as u32) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string(),
        None => format!("{ts}ns"),
    }
}

/// Renders a duration in the largest unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    if d == 0 {
        return "0s".to_string();
    }
    for (unit, suffix) in [(DAY, "d"), (HOUR, "h"), (MINUTE, "m"), (SECOND, "s")] {
        if d % unit == 0 {
            return format!("{}{}", d / unit, suffix);
        }
    }
    format!("{d}ns")
}

/// Identifier of one stored split: the aligned start of its time window plus
/// the sampling interval of the series it belongs to.
///
/// `timestamp` is always a multiple of `sampling * points_per_split`, so two
/// splits of the same series never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SplitKey {
    pub timestamp: Timestamp,
    pub sampling: Duration,
}

impl SplitKey {
    /// Returns the key of the split whose window contains `ts`.
    pub fn of(ts: Timestamp, sampling: Duration, points_per_split: u32) -> Self {
        Self {
            timestamp: round_timestamp(ts, sampling * points_per_split as i64),
            sampling,
        }
    }

    /// Width of the split window.
    pub fn span(&self, points_per_split: u32) -> Duration {
        self.sampling * points_per_split as i64
    }

    /// Exclusive end of the split window, which is also the next key.
    pub fn end(&self, points_per_split: u32) -> Timestamp {
        self.timestamp + self.span(points_per_split)
    }
}

impl std::fmt::Display for SplitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}",
            self.timestamp / SECOND,
            format_duration(self.sampling)
        )
    }
}

//! Core types for TickDB

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Point in time with tick (100 ns) resolution, counted from the Unix epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Smallest representable timestamp
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    /// Largest representable timestamp
    pub const MAX: Timestamp = Timestamp(i64::MAX);
    /// Ticks in one second
    pub const TICKS_PER_SECOND: i64 = 10_000_000;

    /// Create a timestamp from a raw tick count
    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    /// Raw tick count
    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Convert from a UTC date/time, saturating at the representable range
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        let seconds = value.timestamp().saturating_mul(Self::TICKS_PER_SECOND);
        let sub = i64::from(value.timestamp_subsec_nanos() / 100);
        Self(seconds.saturating_add(sub))
    }

    /// Convert to a UTC date/time, if chrono can represent it
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let seconds = self.0.div_euclid(Self::TICKS_PER_SECOND);
        let nanos = (self.0.rem_euclid(Self::TICKS_PER_SECOND) * 100) as u32;
        DateTime::<Utc>::from_timestamp(seconds, nanos)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }
}

impl From<i64> for Timestamp {
    fn from(ticks: i64) -> Self {
        Self(ticks)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_datetime(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 128-bit identifier of one time series
///
/// Ordered as an unsigned 128-bit integer, which is also the order of its
/// big-endian byte representation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SeriesId(Uuid);

impl SeriesId {
    /// Size of the encoded identifier in bytes
    pub const SIZE: usize = 16;

    /// Create a random identifier
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero identifier, reserved for engine metadata
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Create an identifier from its integer form
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Integer form of the identifier
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// Check for the reserved identifier
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Big-endian encoding
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.as_u128().to_be_bytes()
    }

    /// Decode from the big-endian encoding
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self::from_u128(u128::from_be_bytes(bytes))
    }
}

impl From<Uuid> for SeriesId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for SeriesId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single sample: timestamp, quality flags and value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Sample time
    pub timestamp: Timestamp,
    /// Application-defined quality/status flags
    pub flags: u64,
    /// Sample value
    pub value: f64,
}

impl Point {
    /// Encoded size in bytes
    pub const SIZE: usize = 24;

    /// Create a point without flags
    pub fn new(timestamp: impl Into<Timestamp>, value: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            flags: 0,
            value,
        }
    }

    /// Create a point with flags
    pub fn with_flags(timestamp: impl Into<Timestamp>, flags: u64, value: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            flags,
            value,
        }
    }

    /// Sample time
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Half-open time range `[start, end)` for scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (exclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: impl Into<Timestamp>, end: impl Into<Timestamp>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Every representable timestamp
    pub fn all() -> Self {
        Self::new(Timestamp::MIN, Timestamp::MAX)
    }

    /// Everything from `start` onwards
    pub fn from(start: impl Into<Timestamp>) -> Self {
        Self::new(start, Timestamp::MAX)
    }

    /// Check if a timestamp is within the range
    ///
    /// A range ending at [`Timestamp::MAX`] includes `MAX` itself.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && (ts < self.end || self.end == Timestamp::MAX)
    }

    /// Check if the range can contain anything
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_datetime_conversion() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let ts = Timestamp::from_datetime(dt);
        assert_eq!(ts.ticks() % Timestamp::TICKS_PER_SECOND, 0);
        assert_eq!(ts.to_datetime(), Some(dt));

        let before_epoch = Timestamp::from_ticks(-15);
        let back = Timestamp::from_datetime(before_epoch.to_datetime().unwrap());
        assert_eq!(back, before_epoch);
    }

    #[test]
    fn test_series_id_ordering_matches_bytes() {
        let a = SeriesId::from_u128(1);
        let b = SeriesId::from_u128(1 << 64);
        assert!(a < b);
        assert!(a.to_bytes() < b.to_bytes());
        assert_eq!(SeriesId::from_bytes(b.to_bytes()), b);

        let parsed: SeriesId = b.to_string().parse().unwrap();
        assert_eq!(parsed, b);
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(100, 200);
        assert!(range.contains(Timestamp::from_ticks(100)));
        assert!(!range.contains(Timestamp::from_ticks(200)));
        assert!(TimeRange::all().contains(Timestamp::MAX));
        assert!(TimeRange::new(5, 5).is_empty());
    }
}

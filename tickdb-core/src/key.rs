//! Store keys and their orderings
//!
//! Segment keys are `series (u128, big-endian) ++ timestamp (i64, little-endian)`.
//! Raw byte order does not match logical order for the timestamp part, so every
//! table is opened with an explicit [`KeyOrder`].

use crate::{Result, SeriesId, TickError, Timestamp};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// Comparison strategy for the keys of one table
pub trait KeyOrder: fmt::Debug + Copy + Default + Send + Sync + 'static {
    /// Stable name of the ordering, recorded by backends that persist it
    const NAME: &'static str;

    /// Compare two encoded keys
    fn compare(a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders segment keys by series, then by timestamp
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentKeyOrder;

impl KeyOrder for SegmentKeyOrder {
    const NAME: &'static str = "tickdb::SegmentKey";

    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        match (SegmentKey::decode(a), SegmentKey::decode(b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        }
    }
}

/// Orders 128-bit series identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct SeriesIdOrder;

impl KeyOrder for SeriesIdOrder {
    const NAME: &'static str = "tickdb::SeriesId";

    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        // big-endian, so byte order is numeric order
        a.cmp(b)
    }
}

/// Handle to a named table and the ordering of its keys
#[derive(Debug, Clone, Copy)]
pub struct Table<O: KeyOrder> {
    name: &'static str,
    _order: PhantomData<O>,
}

impl<O: KeyOrder> Table<O> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _order: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Compare two keys of this table
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        O::compare(a, b)
    }
}

/// Composite key of one stored segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentKey {
    /// Owning series
    pub series: SeriesId,
    /// Timestamp of the segment's first point
    pub timestamp: Timestamp,
}

impl SegmentKey {
    /// Encoded size in bytes
    pub const SIZE: usize = SeriesId::SIZE + 8;

    pub fn new(series: SeriesId, timestamp: Timestamp) -> Self {
        Self { series, timestamp }
    }

    /// Smallest key of a series
    pub fn series_start(series: SeriesId) -> Self {
        Self::new(series, Timestamp::MIN)
    }

    /// Largest key of a series
    pub fn series_end(series: SeriesId) -> Self {
        Self::new(series, Timestamp::MAX)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..SeriesId::SIZE].copy_from_slice(&self.series.to_bytes());
        buf[SeriesId::SIZE..].copy_from_slice(&self.timestamp.ticks().to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(TickError::InvalidFormat(format!(
                "Segment key must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let mut series = [0u8; SeriesId::SIZE];
        series.copy_from_slice(&data[..SeriesId::SIZE]);
        let mut ticks = [0u8; 8];
        ticks.copy_from_slice(&data[SeriesId::SIZE..]);
        Ok(Self::new(
            SeriesId::from_bytes(series),
            Timestamp::from_ticks(i64::from_le_bytes(ticks)),
        ))
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.series, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(series: u128, ticks: i64) -> SegmentKey {
        SegmentKey::new(SeriesId::from_u128(series), Timestamp::from_ticks(ticks))
    }

    #[test]
    fn test_key_encoding() {
        let k = key(0xABCD, -42);
        let bytes = k.encode();
        assert_eq!(bytes.len(), SegmentKey::SIZE);
        assert_eq!(SegmentKey::decode(&bytes).unwrap(), k);
        assert!(SegmentKey::decode(&bytes[1..]).is_err());
    }

    #[test]
    fn test_segment_key_order() {
        let keys = [
            key(1, i64::MIN),
            key(1, -1),
            key(1, 0),
            key(1, 255),
            key(1, 256),
            key(1, i64::MAX),
            key(2, i64::MIN),
            key(1 << 100, 0),
        ];
        for pair in keys.windows(2) {
            let (a, b) = (pair[0].encode(), pair[1].encode());
            assert_eq!(SegmentKeyOrder::compare(&a, &b), Ordering::Less);
            assert_eq!(SegmentKeyOrder::compare(&b, &a), Ordering::Greater);
        }

        // little-endian timestamps do not sort bytewise
        let (a, b) = (key(1, 255).encode(), key(1, 256).encode());
        assert_eq!(a.cmp(&b), Ordering::Greater);
        assert_eq!(SegmentKeyOrder::compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_series_id_order() {
        let a = SeriesId::from_u128(7).to_bytes();
        let b = SeriesId::from_u128(1 << 70).to_bytes();
        assert_eq!(SeriesIdOrder::compare(&a, &b), Ordering::Less);

        let table: Table<SeriesIdOrder> = Table::new("o");
        assert_eq!(table.name(), "o");
        assert_eq!(table.compare(&b, &a), Ordering::Greater);
    }
}

//! Per-transaction series state

use crate::segment::Segment;
use crate::{SeriesId, Timestamp};

/// Number of points a series holds, derived from its bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Empty,
    Single,
    Multiple,
}

/// Cached bounds and the modification buffer of one series
///
/// `max < min` means the series is empty. The buffer is the one segment the
/// transaction keeps in memory for the series; `loaded` is the key it was last
/// read from or written under, `None` while it has never been stored.
#[derive(Debug)]
pub(crate) struct SeriesCache {
    pub id: SeriesId,
    pub min: Timestamp,
    pub max: Timestamp,
    pub last_segment: Option<Timestamp>,
    pub loaded: Option<Timestamp>,
    pub changes: u64,
    pub buffer: Segment,
    /// Bounds were read from the store in this transaction
    pub bounds_read: bool,
}

impl SeriesCache {
    pub fn new(id: SeriesId, capacity: usize) -> Self {
        Self {
            id,
            min: Timestamp::MAX,
            max: Timestamp::MIN,
            last_segment: None,
            loaded: None,
            changes: 0,
            buffer: Segment::new(capacity),
            bounds_read: false,
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        if self.max < self.min {
            Cardinality::Empty
        } else if self.max == self.min {
            Cardinality::Single
        } else {
            Cardinality::Multiple
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cardinality() == Cardinality::Empty
    }

    pub fn has_changes(&self) -> bool {
        self.changes > 0
    }

    /// Nothing of this series has reached the store
    pub fn is_new(&self) -> bool {
        self.last_segment.is_none()
    }

    /// The buffer holds the series' last segment
    pub fn buffer_is_last(&self) -> bool {
        self.buffer.back().map_or(false, |p| p.timestamp == self.max)
    }

    /// The buffer holds the series' first segment
    pub fn buffer_is_first(&self) -> bool {
        self.buffer.front().map_or(false, |p| p.timestamp == self.min)
    }

    /// Check if `ts` belongs in the buffer rather than another segment
    pub fn buffer_covers(&self, ts: Timestamp) -> bool {
        match self.buffer.front() {
            Some(first) => {
                self.buffer.interval_contains(ts) || (ts < first.timestamp && self.buffer_is_first())
            }
            None => false,
        }
    }

    /// Forget everything, as if the series had never been touched
    pub fn clear(&mut self) {
        let capacity = self.buffer.capacity();
        *self = Self::new(self.id, capacity);
    }
}

//! Fixed-capacity, timestamp-ordered point containers
//!
//! A segment is the unit of storage: every segment is written as one value
//! in the series-data table, keyed by the timestamp of its first point.

mod codec;

pub use codec::{SegmentHeader, FORMAT_VERSION};

use crate::{Point, Timestamp};

/// Outcome of comparing a searched timestamp against a segment or series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    /// The point at the returned index is the greatest one below the timestamp
    Less,
    /// The point at the returned index has exactly the timestamp
    Equal,
    /// Every point is later than the timestamp; the index is 0
    Greater,
    /// There are no points
    Empty,
}

/// Classification and position produced by a search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    result: CompareResult,
    index: usize,
}

impl SearchResult {
    /// Create a search result
    pub const fn new(result: CompareResult, index: usize) -> Self {
        Self { result, index }
    }

    /// Result for an empty segment or series
    pub const fn empty() -> Self {
        Self::new(CompareResult::Empty, 0)
    }

    pub fn result(&self) -> CompareResult {
        self.result
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_less(&self) -> bool {
        self.result == CompareResult::Less
    }

    pub fn is_equal(&self) -> bool {
        self.result == CompareResult::Equal
    }

    pub fn is_greater(&self) -> bool {
        self.result == CompareResult::Greater
    }

    pub fn is_empty(&self) -> bool {
        self.result == CompareResult::Empty
    }

    /// True unless the search hit an empty container
    pub fn found(&self) -> bool {
        !self.is_empty()
    }
}

impl Default for SearchResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// Ordered, duplicate-free, capacity-bounded buffer of points
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    points: Vec<Point>,
    capacity: usize,
}

impl Segment {
    /// Create an empty segment
    pub fn new(capacity: usize) -> Self {
        Self {
            points: Vec::new(),
            capacity,
        }
    }

    /// Create a segment from points that are already ordered and unique
    pub(crate) fn from_sorted(points: Vec<Point>, capacity: usize) -> Self {
        debug_assert!(points.len() <= capacity);
        debug_assert!(points
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        Self { points, capacity }
    }

    /// Maximum number of points
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the segment has no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Check if the segment holds `capacity` points
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.capacity
    }

    /// First (lowest) point
    pub fn front(&self) -> Option<&Point> {
        self.points.first()
    }

    /// Last (highest) point
    pub fn back(&self) -> Option<&Point> {
        self.points.last()
    }

    /// Point at `index`
    pub fn get(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    /// All points in timestamp order
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Remove every point
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Check if `ts` lies between the first and last point, inclusive
    pub fn interval_contains(&self, ts: Timestamp) -> bool {
        match (self.front(), self.back()) {
            (Some(first), Some(last)) => ts >= first.timestamp && ts <= last.timestamp,
            _ => false,
        }
    }

    /// Index of the first point with a timestamp `>= ts`
    pub fn lower_bound(&self, ts: Timestamp) -> usize {
        self.points.partition_point(|p| p.timestamp < ts)
    }

    /// Locate `ts`
    pub fn search(&self, ts: Timestamp) -> SearchResult {
        let Some(last) = self.points.last() else {
            return SearchResult::empty();
        };
        let last_index = self.points.len() - 1;
        if last.timestamp < ts {
            return SearchResult::new(CompareResult::Less, last_index);
        }
        if last.timestamp == ts {
            return SearchResult::new(CompareResult::Equal, last_index);
        }

        let index = self.lower_bound(ts);
        if self.points[index].timestamp == ts {
            SearchResult::new(CompareResult::Equal, index)
        } else if index > 0 {
            SearchResult::new(CompareResult::Less, index - 1)
        } else {
            SearchResult::new(CompareResult::Greater, 0)
        }
    }

    /// Insert or overwrite a point
    ///
    /// # Panics
    ///
    /// Panics if the timestamp is new and the segment is full; use
    /// [`Segment::insert_with_overflow`] for full segments.
    pub fn insert(&mut self, point: Point) {
        let index = self.lower_bound(point.timestamp);
        if let Some(existing) = self.points.get_mut(index) {
            if existing.timestamp == point.timestamp {
                *existing = point;
                return;
            }
        }
        assert!(!self.is_full(), "segment is full");
        self.points.insert(index, point);
    }

    /// Insert or overwrite a point, evicting the highest point when full
    ///
    /// Returns the evicted point. When the new point sorts after every point in
    /// a full segment it is returned unchanged and the segment is untouched.
    pub fn insert_with_overflow(&mut self, point: Point) -> Option<Point> {
        let index = self.lower_bound(point.timestamp);
        if let Some(existing) = self.points.get_mut(index) {
            if existing.timestamp == point.timestamp {
                *existing = point;
                return None;
            }
        }
        if !self.is_full() {
            self.points.insert(index, point);
            return None;
        }
        if index == self.points.len() {
            return Some(point);
        }
        let overflow = self.points.pop();
        self.points.insert(index, point);
        overflow
    }

    /// Append a point that sorts after every existing point
    pub fn push(&mut self, point: Point) {
        debug_assert!(!self.is_full());
        debug_assert!(self
            .back()
            .map_or(true, |last| last.timestamp < point.timestamp));
        self.points.push(point);
    }
}

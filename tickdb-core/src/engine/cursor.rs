//! Per-series cursor: insert, search, navigation and scans

use super::cache::{Cardinality, SeriesCache};
use super::transaction::Transaction;
use super::DATA;
use crate::key::{SegmentKey, SegmentKeyOrder};
use crate::segment::{CompareResult, SearchResult, Segment};
use crate::store::{Store, StoreCursor};
use crate::{Point, Result, SeriesId, TickError, TimeRange, Timestamp};

/// Where a cursor stands relative to its series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Not bound to a series
    Unknown,
    /// Bound; the series has stored segments and nothing is loaded
    Open,
    /// On a segment read from the store
    Positioned,
    /// The buffer holds a stored segment that is not the series' last
    Loaded,
    /// Nothing of the series is stored yet; all data lives in the buffer
    New,
    /// The buffer holds the series' last segment
    End,
}

/// Segment the cursor position refers to
#[derive(Debug)]
enum ActiveSegment {
    None,
    Buffer,
    Stored { key: Timestamp, segment: Segment },
}

/// Cursor over one series of a transaction
///
/// Takes the series' cache out of the transaction for its lifetime and hands
/// it back on [`close`](Self::close) or drop.
pub struct SeriesCursor<'t, 'e, S: Store + 'e> {
    txn: &'t Transaction<'e, S>,
    cache: Option<SeriesCache>,
    store: StoreCursor<'t, S::Txn<'e>, SegmentKeyOrder>,
    active: ActiveSegment,
    index: usize,
}

impl<'t, 'e, S: Store + 'e> SeriesCursor<'t, 'e, S> {
    pub(super) fn open(txn: &'t Transaction<'e, S>, cache: SeriesCache) -> Result<Self> {
        let mut cursor = Self {
            txn,
            cache: Some(cache),
            store: StoreCursor::new(txn.store(), DATA),
            active: ActiveSegment::None,
            index: 0,
        };
        cursor.init()?;
        Ok(cursor)
    }

    /// Derive the cursor state, probing the store only for a fresh cache
    fn init(&mut self) -> Result<()> {
        let txn = self.txn;
        let cache = self.cache.as_mut().ok_or(TickError::CursorClosed)?;
        self.active = ActiveSegment::None;
        self.index = 0;
        self.store.unposition();

        if cache.has_changes() || cache.bounds_read {
            return Ok(());
        }

        let id = cache.id;
        cache.clear();
        if let Some((_, first)) = txn.first_segment(id)? {
            let (last_key, last) = txn.last_segment(id)?.ok_or_else(|| {
                TickError::Invariant(format!("Series {} has a first but no last segment", id))
            })?;
            match (first.front(), last.back()) {
                (Some(min), Some(max)) => {
                    cache.min = min.timestamp;
                    cache.max = max.timestamp;
                }
                _ => {
                    return Err(TickError::Invariant(format!(
                        "Series {} has an empty segment",
                        id
                    )))
                }
            }
            cache.last_segment = Some(last_key);
        }
        cache.bounds_read = true;
        Ok(())
    }

    fn cache(&self) -> Result<&SeriesCache> {
        self.cache.as_ref().ok_or(TickError::CursorClosed)
    }

    pub fn id(&self) -> Option<SeriesId> {
        self.cache.as_ref().map(|c| c.id)
    }

    pub fn state(&self) -> CursorState {
        let Some(cache) = &self.cache else {
            return CursorState::Unknown;
        };
        if matches!(self.active, ActiveSegment::Stored { .. }) {
            CursorState::Positioned
        } else if cache.is_new() {
            CursorState::New
        } else if cache.buffer.is_empty() {
            CursorState::Open
        } else if cache.buffer_is_last() {
            CursorState::End
        } else {
            CursorState::Loaded
        }
    }

    pub fn cardinality(&self) -> Result<Cardinality> {
        Ok(self.cache()?.cardinality())
    }

    /// Timestamp of the first point, if any
    pub fn min_timestamp(&self) -> Result<Option<Timestamp>> {
        let cache = self.cache()?;
        Ok((!cache.is_empty()).then_some(cache.min))
    }

    /// Timestamp of the last point, if any
    pub fn max_timestamp(&self) -> Result<Option<Timestamp>> {
        let cache = self.cache()?;
        Ok((!cache.is_empty()).then_some(cache.max))
    }

    /// Write the modification buffer to the store if it has changes
    pub fn flush(&mut self) -> Result<()> {
        let txn = self.txn;
        let cache = self.cache.as_mut().ok_or(TickError::CursorClosed)?;
        txn.flush_cache(cache)
    }

    /// Flush and rebind the cursor to another series
    ///
    /// On error the cursor stays bound to its current series.
    pub fn change_series(&mut self, id: SeriesId) -> Result<()> {
        self.flush().or_else(|e| match e {
            TickError::CursorClosed => Ok(()),
            e => Err(e),
        })?;

        if self.id() != Some(id) {
            let cache = self.txn.checkout(id)?;
            if let Some(old) = self.cache.replace(cache) {
                self.txn.checkin(old);
            }
        }
        self.init()
    }

    /// Unbind the cursor; its pending changes stay with the transaction
    pub fn close(&mut self) {
        if let Some(cache) = self.cache.take() {
            self.txn.checkin(cache);
        }
        self.active = ActiveSegment::None;
        self.store.unposition();
    }

    // ---- insert ----

    /// Insert a point, overwriting any point with the same timestamp
    pub fn insert(&mut self, point: Point) -> Result<()> {
        let txn = self.txn;
        if txn.is_read_only() {
            return Err(TickError::ReadOnly);
        }
        let cache = self.cache.as_mut().ok_or(TickError::CursorClosed)?;
        self.active = ActiveSegment::None;
        let ts = point.timestamp;

        if cache.is_empty() {
            cache.buffer.clear();
            cache.buffer.push(point);
            cache.min = ts;
            cache.max = ts;
            cache.changes += 1;
            return Ok(());
        }

        if ts > cache.max {
            return append(txn, cache, point);
        }

        if !cache.buffer_covers(ts) {
            txn.flush_cache(cache)?;
            let (key, segment) = txn
                .segment_for(cache.id, ts)?
                .ok_or(TickError::SeriesNotFound(cache.id))?;
            cache.buffer = segment;
            cache.loaded = Some(key);
        }

        let overflow = cache.buffer.insert_with_overflow(point);
        if ts < cache.min {
            cache.min = ts;
        }
        cache.changes += 1;
        if let Some(overflow) = overflow {
            txn.relocate_overflow(cache, overflow)?;
        }
        Ok(())
    }

    // ---- search and navigation ----

    /// Locate `ts` and position the cursor on the result
    ///
    /// `Equal` positions on the match, `Less` on the greatest point below
    /// `ts`, `Greater` on the first point of the series.
    pub fn search(&mut self, ts: Timestamp) -> Result<SearchResult> {
        let txn = self.txn;
        let cache = self.cache.as_mut().ok_or(TickError::CursorClosed)?;
        if cache.is_empty() {
            self.active = ActiveSegment::None;
            self.store.unposition();
            return Ok(SearchResult::empty());
        }

        if buffer_may_hold(cache, ts) {
            let result = cache.buffer.search(ts);
            self.active = ActiveSegment::Buffer;
            self.index = result.index();
            return Ok(result);
        }

        if let ActiveSegment::Stored { segment, .. } = &self.active {
            if segment.interval_contains(ts) {
                let result = segment.search(ts);
                self.index = result.index();
                return Ok(result);
            }
        }

        txn.flush_cache(cache)?;
        let id = cache.id;
        let (key, segment) = txn.segment_for(id, ts)?.ok_or_else(|| {
            TickError::Invariant(format!("Series {} has bounds but no segments", id))
        })?;
        let result = segment.search(ts);
        self.store.move_to(&SegmentKey::new(id, key).encode())?;
        self.active = ActiveSegment::Stored { key, segment };
        self.index = result.index();
        Ok(result)
    }

    /// Position on the first point; `false` for an empty series
    pub fn move_first(&mut self) -> Result<bool> {
        let txn = self.txn;
        let cache = self.cache.as_mut().ok_or(TickError::CursorClosed)?;
        txn.flush_cache(cache)?;
        if cache.is_empty() {
            self.active = ActiveSegment::None;
            return Ok(false);
        }
        let key = cache.min;
        self.position_at(key, false)
    }

    /// Position on the last point; `false` for an empty series
    pub fn move_last(&mut self) -> Result<bool> {
        let txn = self.txn;
        let cache = self.cache.as_mut().ok_or(TickError::CursorClosed)?;
        txn.flush_cache(cache)?;
        if cache.is_empty() {
            self.active = ActiveSegment::None;
            return Ok(false);
        }
        let id = cache.id;
        let key = cache.last_segment.ok_or_else(|| {
            TickError::Invariant(format!("Series {} has no last segment after flush", id))
        })?;
        self.position_at(key, true)
    }

    /// Step to the next point; an unpositioned cursor moves to the first
    ///
    /// Returns `false` at the end of the series, keeping the position.
    pub fn move_next(&mut self) -> Result<bool> {
        let len = match self.active_segment() {
            Some(segment) => segment.len(),
            None => return self.move_first(),
        };
        if self.index + 1 < len {
            self.index += 1;
            return Ok(true);
        }
        self.step(true)
    }

    /// Step to the previous point; an unpositioned cursor moves to the last
    ///
    /// Returns `false` at the start of the series, keeping the position.
    pub fn move_previous(&mut self) -> Result<bool> {
        if self.active_segment().is_none() {
            return self.move_last();
        }
        if self.index > 0 {
            self.index -= 1;
            return Ok(true);
        }
        self.step(false)
    }

    /// Point under the cursor
    pub fn current(&self) -> Option<Point> {
        self.active_segment()
            .and_then(|segment| segment.get(self.index))
            .copied()
    }

    fn active_segment(&self) -> Option<&Segment> {
        match &self.active {
            ActiveSegment::None => None,
            ActiveSegment::Buffer => self.cache.as_ref().map(|c| &c.buffer),
            ActiveSegment::Stored { segment, .. } => Some(segment),
        }
    }

    /// Load the stored segment keyed `key` and position on its first or last point
    fn position_at(&mut self, key: Timestamp, at_end: bool) -> Result<bool> {
        let id = self.cache()?.id;
        if !self.store.move_to(&SegmentKey::new(id, key).encode())? {
            return Err(TickError::Invariant(format!(
                "Segment {} of series {} is missing",
                key, id
            )));
        }
        match self.segment_under_store_cursor(id)? {
            Some((key, segment)) => {
                self.index = if at_end { segment.len() - 1 } else { 0 };
                self.active = ActiveSegment::Stored { key, segment };
                Ok(true)
            }
            None => Err(TickError::Invariant(format!(
                "Segment {} of series {} is missing",
                key, id
            ))),
        }
    }

    /// Move to the adjacent stored segment of the series
    fn step(&mut self, forward: bool) -> Result<bool> {
        let txn = self.txn;
        let cache = self.cache.as_mut().ok_or(TickError::CursorClosed)?;
        let id = cache.id;
        let from = match &self.active {
            ActiveSegment::None => return Ok(false),
            ActiveSegment::Buffer => match cache.buffer.front() {
                Some(p) => p.timestamp,
                None => return Ok(false),
            },
            ActiveSegment::Stored { key, .. } => *key,
        };
        txn.flush_cache(cache)?;

        if !self.store.search(&SegmentKey::new(id, from).encode())? {
            return Err(TickError::Invariant(format!(
                "Cursor lost segment {} of series {}",
                from, id
            )));
        }
        let moved = if forward {
            self.store.move_next()?
        } else {
            self.store.move_previous()?
        };
        if !moved {
            return Ok(false);
        }

        match self.segment_under_store_cursor(id)? {
            Some((key, segment)) => {
                self.index = if forward { 0 } else { segment.len() - 1 };
                self.active = ActiveSegment::Stored { key, segment };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn segment_under_store_cursor(&self, id: SeriesId) -> Result<Option<(Timestamp, Segment)>> {
        self.txn.segment_under(&self.store, id)
    }

    // ---- iteration ----

    /// Lazily iterate the points in `range` in ascending order
    ///
    /// Each call starts over with a fresh search.
    pub fn scan(&mut self, range: TimeRange) -> Scan<'_, 't, 'e, S> {
        Scan {
            cursor: self,
            range,
            started: false,
            done: false,
        }
    }

    /// Visit every point, returning how many were visited
    pub fn for_each(&mut self, f: impl FnMut(&Point)) -> Result<usize> {
        self.for_each_range(Timestamp::MIN, Timestamp::MAX, f)
    }

    /// Visit every point at or after `start`
    pub fn for_each_from(&mut self, start: Timestamp, f: impl FnMut(&Point)) -> Result<usize> {
        self.for_each_range(start, Timestamp::MAX, f)
    }

    /// Visit every point in `[start, end)`
    pub fn for_each_range(
        &mut self,
        start: Timestamp,
        end: Timestamp,
        mut f: impl FnMut(&Point),
    ) -> Result<usize> {
        let mut count = 0;
        for point in self.scan(TimeRange::new(start, end)) {
            f(&point?);
            count += 1;
        }
        Ok(count)
    }
}

impl<'t, 'e, S: Store + 'e> Drop for SeriesCursor<'t, 'e, S> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            self.txn.checkin(cache);
        }
    }
}

/// Append a point after the current maximum of the series
fn append<S: Store>(txn: &Transaction<'_, S>, cache: &mut SeriesCache, point: Point) -> Result<()> {
    if !cache.buffer_is_last() {
        txn.flush_cache(cache)?;
        let id = cache.id;
        let key = cache.last_segment.ok_or_else(|| {
            TickError::Invariant(format!("Series {} has points but no last segment", id))
        })?;
        let last = txn.segment_at(id, key)?.ok_or_else(|| {
            TickError::Invariant(format!("Last segment {} of series {} is missing", key, id))
        })?;
        cache.buffer = last;
        cache.loaded = Some(key);
    }

    if cache.buffer.is_full() {
        txn.flush_cache(cache)?;
        cache.buffer.clear();
        cache.loaded = None;
    }
    cache.buffer.push(point);
    cache.max = point.timestamp;
    cache.changes += 1;
    Ok(())
}

/// Check if a search for `ts` can be answered from the buffer alone
fn buffer_may_hold(cache: &SeriesCache, ts: Timestamp) -> bool {
    let (Some(first), Some(last)) = (cache.buffer.front(), cache.buffer.back()) else {
        return false;
    };
    (cache.buffer_is_last() && ts >= first.timestamp)
        || (cache.buffer_is_first() && ts <= last.timestamp)
        || cache.buffer.interval_contains(ts)
}

/// Lazy iterator over a range of one series
///
/// Yields `Err` at most once, then ends.
pub struct Scan<'c, 't, 'e, S: Store + 'e> {
    cursor: &'c mut SeriesCursor<'t, 'e, S>,
    range: TimeRange,
    started: bool,
    done: bool,
}

impl<'c, 't, 'e, S: Store + 'e> Scan<'c, 't, 'e, S> {
    fn advance(&mut self) -> Result<Option<Point>> {
        let moved = if !self.started {
            self.started = true;
            let result = self.cursor.search(self.range.start)?;
            match result.result() {
                CompareResult::Empty => false,
                CompareResult::Less => self.cursor.move_next()?,
                CompareResult::Equal | CompareResult::Greater => true,
            }
        } else {
            self.cursor.move_next()?
        };
        if !moved {
            return Ok(None);
        }
        Ok(self
            .cursor
            .current()
            .filter(|p| self.range.contains(p.timestamp)))
    }
}

impl<'c, 't, 'e, S: Store + 'e> Iterator for Scan<'c, 't, 'e, S> {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(point)) => Some(Ok(point)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

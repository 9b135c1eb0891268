//! Engine transactions and their series caches

use super::cache::SeriesCache;
use super::cursor::SeriesCursor;
use super::{write_meta, Engine, SegmentInfo, SeriesInfo, DATA, OBJECTS};
use crate::key::{SegmentKey, SegmentKeyOrder};
use crate::segment::Segment;
use crate::store::{Entry, Store, StoreCursor, StoreTransaction, WriteFlags};
use crate::{Point, Result, SeriesId, TickError, Timestamp};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// A transaction over the engine's tables
///
/// Keeps one [`SeriesCache`] per touched series. Mutations collect in each
/// cache's modification buffer and reach the store when the cursor moves to
/// another segment, when the series is switched, or on [`commit`](Self::commit).
///
/// Not `Sync`: a transaction and its cursors belong to one thread.
pub struct Transaction<'e, S: Store + 'e> {
    engine: &'e Engine<S>,
    inner: S::Txn<'e>,
    caches: RefCell<HashMap<SeriesId, SeriesCache>>,
    /// Series currently bound to a cursor
    checked_out: RefCell<HashSet<SeriesId>>,
}

impl<'e, S: Store + 'e> Transaction<'e, S> {
    pub(super) fn new(engine: &'e Engine<S>, inner: S::Txn<'e>) -> Self {
        Self {
            engine,
            inner,
            caches: RefCell::new(HashMap::new()),
            checked_out: RefCell::new(HashSet::new()),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    pub fn segment_capacity(&self) -> usize {
        self.engine.segment_capacity()
    }

    pub(crate) fn store(&self) -> &S::Txn<'e> {
        &self.inner
    }

    /// Bind a cursor to a series
    ///
    /// Fails with [`TickError::SeriesBusy`] while another cursor of this
    /// transaction is bound to the same series.
    pub fn open_series(&self, id: SeriesId) -> Result<SeriesCursor<'_, 'e, S>> {
        let cache = self.checkout(id)?;
        SeriesCursor::open(self, cache)
    }

    /// Insert points into one series, returning how many were written
    pub fn insert_points<I>(&self, id: SeriesId, points: I) -> Result<usize>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut cursor = self.open_series(id)?;
        let mut count = 0;
        for point in points {
            cursor.insert(point)?;
            count += 1;
        }
        Ok(count)
    }

    /// Flush every modification buffer and commit the store transaction
    pub fn commit(self) -> Result<()> {
        let mut caches = self.caches.into_inner();
        let mut flushed = 0;
        for cache in caches.values_mut() {
            if cache.has_changes() {
                flush(&self.inner, cache)?;
                flushed += 1;
            }
        }
        self.inner.commit()?;
        debug!("Committed transaction, flushed {} series", flushed);
        Ok(())
    }

    /// Discard all cached changes and the store transaction
    pub fn abort(self) -> Result<()> {
        self.inner.abort()?;
        debug!("Aborted transaction");
        Ok(())
    }

    /// Abort and begin a fresh transaction of the same kind
    pub fn reset(self) -> Result<Self> {
        let engine = self.engine;
        let read_only = self.is_read_only();
        self.abort()?;
        if read_only {
            engine.begin_read()
        } else {
            engine.begin_transaction()
        }
    }

    // ---- series caches ----

    pub(super) fn checkout(&self, id: SeriesId) -> Result<SeriesCache> {
        if !self.checked_out.borrow_mut().insert(id) {
            return Err(TickError::SeriesBusy(id));
        }
        let cache = self
            .caches
            .borrow_mut()
            .remove(&id)
            .unwrap_or_else(|| SeriesCache::new(id, self.segment_capacity()));
        Ok(cache)
    }

    pub(super) fn checkin(&self, cache: SeriesCache) {
        self.checked_out.borrow_mut().remove(&cache.id);
        self.caches.borrow_mut().insert(cache.id, cache);
    }

    /// Run `f` on the cache of an idle series, creating it if needed
    fn with_cache<R>(
        &self,
        id: SeriesId,
        f: impl FnOnce(&mut SeriesCache) -> Result<R>,
    ) -> Result<R> {
        let mut cache = self.checkout(id)?;
        let result = f(&mut cache);
        self.checkin(cache);
        result
    }

    pub(super) fn flush_cache(&self, cache: &mut SeriesCache) -> Result<()> {
        flush(&self.inner, cache)
    }

    // ---- segment access ----

    fn decode(&self, entry: Entry) -> Result<(SegmentKey, Segment)> {
        let key = SegmentKey::decode(&entry.key)?;
        let segment = Segment::from_bytes(&entry.value, self.segment_capacity())?;
        Ok((key, segment))
    }

    /// Decode `entry` if it belongs to series `id`
    pub(super) fn decode_in_series(
        &self,
        entry: Option<Entry>,
        id: SeriesId,
    ) -> Result<Option<(Timestamp, Segment)>> {
        let Some(entry) = entry else {
            return Ok(None);
        };
        if SegmentKey::decode(&entry.key)?.series != id {
            return Ok(None);
        }
        let (key, segment) = self.decode(entry)?;
        Ok(Some((key.timestamp, segment)))
    }

    /// Segment stored under exactly `(id, ts)`
    pub(super) fn segment_at(&self, id: SeriesId, ts: Timestamp) -> Result<Option<Segment>> {
        let key = SegmentKey::new(id, ts).encode();
        match self.inner.get(&DATA, &key)? {
            Some(value) => Ok(Some(Segment::from_bytes(&value, self.segment_capacity())?)),
            None => Ok(None),
        }
    }

    pub(super) fn first_segment(&self, id: SeriesId) -> Result<Option<(Timestamp, Segment)>> {
        self.ceil_segment(id, Timestamp::MIN)
    }

    pub(super) fn last_segment(&self, id: SeriesId) -> Result<Option<(Timestamp, Segment)>> {
        let mut cursor = StoreCursor::new(&self.inner, DATA);
        let found = if cursor.search(&SegmentKey::series_end(id).encode())? {
            true
        } else if cursor.is_positioned() {
            cursor.move_previous()?
        } else {
            cursor.move_last()?
        };
        if !found {
            return Ok(None);
        }
        self.segment_under(&cursor, id)
    }

    /// Segment under `cursor`, if it belongs to series `id`
    pub(super) fn segment_under(
        &self,
        cursor: &StoreCursor<'_, S::Txn<'e>, SegmentKeyOrder>,
        id: SeriesId,
    ) -> Result<Option<(Timestamp, Segment)>> {
        let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
            return Ok(None);
        };
        let key = SegmentKey::decode(key)?;
        if key.series != id {
            return Ok(None);
        }
        let segment = Segment::from_bytes(value, self.segment_capacity())?;
        Ok(Some((key.timestamp, segment)))
    }

    /// Last segment of the series with a key `<= ts`
    pub(super) fn floor_segment(
        &self,
        id: SeriesId,
        ts: Timestamp,
    ) -> Result<Option<(Timestamp, Segment)>> {
        if let Some(segment) = self.segment_at(id, ts)? {
            return Ok(Some((ts, segment)));
        }
        let key = SegmentKey::new(id, ts).encode();
        let entry = self.inner.prev_before(&DATA, &key)?;
        self.decode_in_series(entry, id)
    }

    /// First segment of the series with a key `>= ts`
    pub(super) fn ceil_segment(
        &self,
        id: SeriesId,
        ts: Timestamp,
    ) -> Result<Option<(Timestamp, Segment)>> {
        let key = SegmentKey::new(id, ts).encode();
        let entry = self.inner.seek(&DATA, &key)?;
        self.decode_in_series(entry, id)
    }

    /// Stored segment that should hold `ts`: the one keyed at or before it,
    /// else the first of the series
    pub(super) fn segment_for(
        &self,
        id: SeriesId,
        ts: Timestamp,
    ) -> Result<Option<(Timestamp, Segment)>> {
        match self.floor_segment(id, ts)? {
            Some(found) => Ok(Some(found)),
            None => self.first_segment(id),
        }
    }

    /// Move a point evicted from a full segment into the following segments
    ///
    /// Each full segment on the way passes its own highest point on; the chain
    /// ends in a segment with room or in a new tail segment.
    pub(super) fn relocate_overflow(&self, cache: &mut SeriesCache, overflow: Point) -> Result<()> {
        // the stored copy of the buffer must not be mistaken for a later segment
        self.flush_cache(cache)?;

        let id = cache.id;
        let mut cursor = StoreCursor::new(&self.inner, DATA);
        let mut overflow = overflow;
        loop {
            cursor.search(&SegmentKey::new(id, overflow.timestamp).encode())?;
            match self.segment_under(&cursor, id)? {
                Some((key, mut segment)) => {
                    let next = segment.insert_with_overflow(overflow);
                    let new_key = segment
                        .front()
                        .map(|p| p.timestamp)
                        .ok_or_else(|| TickError::Invariant("empty segment after insert".into()))?;

                    trace!(
                        "Moved {} of series {} into segment {} (now {})",
                        overflow.timestamp,
                        id,
                        key,
                        new_key
                    );

                    cursor.delete()?;
                    cursor.write(
                        &SegmentKey::new(id, new_key).encode(),
                        &segment.to_bytes(),
                        WriteFlags::NoOverwrite,
                    )?;
                    if cache.last_segment == Some(key) {
                        cache.last_segment = Some(new_key);
                    }

                    match next {
                        Some(point) => overflow = point,
                        None => return Ok(()),
                    }
                }
                None => {
                    let mut tail = Segment::new(self.segment_capacity());
                    tail.push(overflow);
                    cursor.write(
                        &SegmentKey::new(id, overflow.timestamp).encode(),
                        &tail.to_bytes(),
                        WriteFlags::NoOverwrite,
                    )?;
                    trace!(
                        "Created tail segment {} for series {}",
                        overflow.timestamp,
                        id
                    );
                    cache.last_segment = Some(overflow.timestamp);
                    if overflow.timestamp > cache.max {
                        cache.max = overflow.timestamp;
                    }
                    return Ok(());
                }
            }
        }
    }

    // ---- series administration ----

    /// Store descriptive metadata for a series
    pub fn put_series_info(&self, id: SeriesId, info: &SeriesInfo) -> Result<()> {
        if id.is_nil() {
            return Err(TickError::Config("The nil series id is reserved".into()));
        }
        let value = serde_json::to_vec(info)?;
        self.inner
            .put(&OBJECTS, &id.to_bytes(), &value, WriteFlags::Default)?;
        Ok(())
    }

    pub fn series_info(&self, id: SeriesId) -> Result<Option<SeriesInfo>> {
        if id.is_nil() {
            return Ok(None);
        }
        match self.inner.get(&OBJECTS, &id.to_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// All series with stored metadata, in id order
    pub fn list_series(&self) -> Result<Vec<(SeriesId, SeriesInfo)>> {
        let mut result = Vec::new();
        let mut cursor = StoreCursor::new(&self.inner, OBJECTS);
        let mut positioned = cursor.move_first()?;
        while positioned {
            if let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                let bytes: [u8; SeriesId::SIZE] = key
                    .try_into()
                    .map_err(|_| TickError::InvalidFormat("Object key must be 16 bytes".into()))?;
                let id = SeriesId::from_bytes(bytes);
                if !id.is_nil() {
                    result.push((id, serde_json::from_slice(value)?));
                }
            }
            positioned = cursor.move_next()?;
        }
        Ok(result)
    }

    /// Distinct series with at least one stored segment
    ///
    /// Pending buffers are not considered; call after [`commit`](Self::commit)
    /// or on a fresh transaction for a complete answer.
    pub fn stored_series(&self) -> Result<Vec<SeriesId>> {
        let mut result = Vec::new();
        let mut entry = self.inner.first(&DATA)?;
        while let Some(found) = entry {
            let id = SegmentKey::decode(&found.key)?.series;
            result.push(id);
            let end = SegmentKey::series_end(id).encode();
            entry = self.inner.next_after(&DATA, &end)?;
        }
        Ok(result)
    }

    /// Delete every segment and the metadata of a series
    pub fn remove_series(&self, id: SeriesId) -> Result<usize> {
        self.with_cache(id, |cache| {
            self.flush_cache(cache)?;
            let mut removed = 0;
            while let Some((key, _)) = self.first_segment(id)? {
                self.inner
                    .delete(&DATA, &SegmentKey::new(id, key).encode())?;
                removed += 1;
            }
            if !id.is_nil() {
                self.inner.delete(&OBJECTS, &id.to_bytes())?;
            }
            cache.clear();
            cache.bounds_read = true;
            debug!("Removed series {} ({} segments)", id, removed);
            Ok(removed)
        })
    }

    /// Segment layout of a series, after flushing its pending changes
    pub fn segments(&self, id: SeriesId) -> Result<Vec<SegmentInfo>> {
        self.with_cache(id, |cache| self.flush_cache(cache))?;

        let mut result = Vec::new();
        let mut next = self.first_segment(id)?;
        while let Some((key, segment)) = next {
            let (first, last) = match (segment.front(), segment.back()) {
                (Some(first), Some(last)) => (first.timestamp, last.timestamp),
                _ => return Err(TickError::Corruption(format!("Empty segment {}", key))),
            };
            result.push(SegmentInfo {
                key,
                len: segment.len(),
                first,
                last,
            });
            let entry = self
                .inner
                .next_after(&DATA, &SegmentKey::new(id, key).encode())?;
            next = self.decode_in_series(entry, id)?;
        }
        Ok(result)
    }

    /// Check the stored layout of a series, returning its point count
    ///
    /// Every segment must be keyed by its first point, lie strictly after the
    /// previous one, and be full unless it is the last.
    pub fn verify_series(&self, id: SeriesId) -> Result<usize> {
        let segments = self.segments(id)?;
        let capacity = self.segment_capacity();
        let mut points = 0;
        let mut previous: Option<Timestamp> = None;

        for (index, info) in segments.iter().enumerate() {
            if info.key != info.first {
                return Err(TickError::Invariant(format!(
                    "Segment {} of series {} starts at {}",
                    info.key, id, info.first
                )));
            }
            if previous.map_or(false, |last| last >= info.first) {
                return Err(TickError::Invariant(format!(
                    "Segment {} of series {} overlaps its predecessor",
                    info.key, id
                )));
            }
            if index + 1 < segments.len() && info.len != capacity {
                return Err(TickError::Invariant(format!(
                    "Segment {} of series {} holds {} of {} points",
                    info.key, id, info.len, capacity
                )));
            }
            previous = Some(info.last);
            points += info.len;
        }
        Ok(points)
    }

    /// Remove all series data and metadata
    pub fn truncate_all(&self) -> Result<()> {
        if !self.checked_out.borrow().is_empty() {
            let busy = self.checked_out.borrow().iter().next().copied();
            return Err(TickError::SeriesBusy(busy.unwrap_or_default()));
        }
        self.inner.truncate(&DATA)?;
        self.inner.truncate(&OBJECTS)?;
        write_meta(&self.inner, &self.engine.meta())?;
        self.caches.borrow_mut().clear();
        debug!("Truncated all series");
        Ok(())
    }
}

/// Write a dirty modification buffer under the timestamp of its first point
fn flush<T: StoreTransaction>(txn: &T, cache: &mut SeriesCache) -> Result<()> {
    if !cache.has_changes() {
        return Ok(());
    }
    let front = cache.buffer.front().map(|p| p.timestamp).ok_or_else(|| {
        TickError::Invariant(format!(
            "Series {} has pending changes but an empty buffer",
            cache.id
        ))
    })?;

    if let Some(loaded) = cache.loaded {
        if loaded != front {
            txn.delete(&DATA, &SegmentKey::new(cache.id, loaded).encode())?;
            if cache.last_segment == Some(loaded) {
                cache.last_segment = Some(front);
            }
        }
    }
    txn.put(
        &DATA,
        &SegmentKey::new(cache.id, front).encode(),
        &cache.buffer.to_bytes(),
        WriteFlags::Default,
    )?;

    cache.loaded = Some(front);
    if cache.buffer_is_last() {
        cache.last_segment = Some(front);
    }
    cache.changes = 0;

    debug!(
        "Flushed segment {} of series {} ({} points)",
        front,
        cache.id,
        cache.buffer.len()
    );
    Ok(())
}

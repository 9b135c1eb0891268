use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;

use arc_swap::ArcSwap;
use imbl::OrdMap;
use parking_lot::{Mutex, MutexGuard};

use super::{Entry, Store, StoreError, StoreTransaction, WriteFlags};
use crate::key::{KeyOrder, Table};

/// Key bytes plus the ordering of the table they belong to
#[derive(Clone)]
struct MemKey {
    bytes: Vec<u8>,
    compare: fn(&[u8], &[u8]) -> Ordering,
}

impl MemKey {
    fn new<O: KeyOrder>(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            compare: O::compare,
        }
    }
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&self.bytes, &other.bytes)
    }
}

type MemTable = OrdMap<MemKey, Vec<u8>>;
type Tables = HashMap<String, MemTable>;

fn entry((key, value): (&MemKey, &Vec<u8>)) -> Entry {
    Entry::new(key.bytes.clone(), value.clone())
}

/// In-process store with snapshot isolation
///
/// Committed state is one immutable map of tables published through an
/// [`ArcSwap`]. Readers clone the current `Arc`; the single writer works on a
/// structurally shared copy and swaps it in on commit.
pub struct MemoryStore {
    tables: ArcSwap<Tables>,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: ArcSwap::from_pointee(Tables::new()),
            write_lock: Mutex::new(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    type Txn<'a> = MemoryTransaction<'a>;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError> {
        let write_guard = if read_only {
            None
        } else {
            Some(self.write_lock.lock())
        };

        // taken after the lock so a writer always starts from the latest commit
        let snapshot = self.tables.load_full();

        Ok(MemoryTransaction {
            store: self,
            snapshot: RefCell::new(Some(snapshot)),
            dirty: Cell::new(false),
            read_only,
            _write_guard: write_guard,
        })
    }
}

pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    snapshot: RefCell<Option<Arc<Tables>>>,
    dirty: Cell<bool>,
    read_only: bool,
    /// Write lock held for the duration of a write transaction.
    _write_guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> MemoryTransaction<'a> {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn read<O: KeyOrder, R>(
        &self,
        table: &Table<O>,
        f: impl FnOnce(&MemTable) -> R,
    ) -> Result<R, StoreError> {
        let snap = self.snapshot.borrow();
        let tables = snap.as_ref().ok_or(StoreError::TransactionConsumed)?;
        let data = tables
            .get(table.name())
            .ok_or_else(|| StoreError::TableNotFound(table.name().to_string()))?;
        Ok(f(data))
    }

    fn write<O: KeyOrder, R>(
        &self,
        table: &Table<O>,
        f: impl FnOnce(&mut MemTable) -> R,
    ) -> Result<R, StoreError> {
        self.check_writable()?;
        let mut snap = self.snapshot.borrow_mut();
        let tables = snap.as_mut().ok_or(StoreError::TransactionConsumed)?;
        let data = Arc::make_mut(tables)
            .get_mut(table.name())
            .ok_or_else(|| StoreError::TableNotFound(table.name().to_string()))?;
        self.dirty.set(true);
        Ok(f(data))
    }

    fn schema<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> Result<R, StoreError> {
        self.check_writable()?;
        let mut snap = self.snapshot.borrow_mut();
        let tables = snap.as_mut().ok_or(StoreError::TransactionConsumed)?;
        self.dirty.set(true);
        Ok(f(Arc::make_mut(tables)))
    }
}

impl<'a> StoreTransaction for MemoryTransaction<'a> {
    fn create_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<(), StoreError> {
        self.schema(|tables| {
            tables.entry(table.name().to_string()).or_default();
        })
    }

    fn drop_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<bool, StoreError> {
        self.schema(|tables| tables.remove(table.name()).is_some())
    }

    fn has_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<bool, StoreError> {
        let snap = self.snapshot.borrow();
        let tables = snap.as_ref().ok_or(StoreError::TransactionConsumed)?;
        Ok(tables.contains_key(table.name()))
    }

    fn get<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let key = MemKey::new::<O>(key);
        self.read(table, |data| data.get(&key).cloned())
    }

    fn seek<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<Option<Entry>, StoreError> {
        let key = MemKey::new::<O>(key);
        self.read(table, |data| {
            data.range((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(entry)
        })
    }

    fn next_after<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
    ) -> Result<Option<Entry>, StoreError> {
        let key = MemKey::new::<O>(key);
        self.read(table, |data| {
            data.range((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .map(entry)
        })
    }

    fn prev_before<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
    ) -> Result<Option<Entry>, StoreError> {
        let key = MemKey::new::<O>(key);
        self.read(table, |data| {
            data.range((Bound::Unbounded, Bound::Excluded(key)))
                .next_back()
                .map(entry)
        })
    }

    fn first<O: KeyOrder>(&self, table: &Table<O>) -> Result<Option<Entry>, StoreError> {
        self.read(table, |data| data.iter().next().map(entry))
    }

    fn last<O: KeyOrder>(&self, table: &Table<O>) -> Result<Option<Entry>, StoreError> {
        self.read(table, |data| data.iter().next_back().map(entry))
    }

    fn put<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
        value: &[u8],
        flags: WriteFlags,
    ) -> Result<(), StoreError> {
        let key = MemKey::new::<O>(key);
        self.write(table, |data| {
            if flags == WriteFlags::NoOverwrite && data.contains_key(&key) {
                return Err(StoreError::KeyExists);
            }
            data.insert(key, value.to_vec());
            Ok(())
        })?
    }

    fn delete<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<bool, StoreError> {
        let key = MemKey::new::<O>(key);
        self.write(table, |data| data.remove(&key).is_some())
    }

    fn truncate<O: KeyOrder>(&self, table: &Table<O>) -> Result<(), StoreError> {
        self.write(table, |data| data.clear())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn commit(self) -> Result<(), StoreError> {
        let snapshot = self
            .snapshot
            .into_inner()
            .ok_or(StoreError::TransactionConsumed)?;

        if !self.read_only && self.dirty.get() {
            self.store.tables.store(snapshot);
        }
        Ok(())
    }

    fn abort(self) -> Result<(), StoreError> {
        if self.snapshot.into_inner().is_none() {
            return Err(StoreError::TransactionConsumed);
        }
        Ok(())
    }
}

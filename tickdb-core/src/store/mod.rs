//! Embedded key-value store abstraction
//!
//! The engine needs an ordered keyspace per table with a custom comparator,
//! neighbour lookups, and single-writer transactions over consistent
//! snapshots. Two backends implement it:
//!
//! - [`RedbStore`]: persistent, file-backed (feature `redb`)
//! - [`MemoryStore`]: in-process persistent maps (feature `memory`)

mod cursor;
mod error;
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redb")]
mod redb;

pub use cursor::StoreCursor;
pub use error::StoreError;
#[cfg(feature = "memory")]
pub use memory::{MemoryStore, MemoryTransaction};
#[cfg(feature = "redb")]
pub use self::redb::{RedbStore, RedbTransaction};

use crate::key::{KeyOrder, Table};

/// Flags for [`StoreTransaction::put`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteFlags {
    /// Insert or replace
    #[default]
    Default,
    /// Fail with [`StoreError::KeyExists`] when the key is present
    NoOverwrite,
}

/// One key/value pair read from a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub trait Store {
    type Txn<'a>: StoreTransaction
    where
        Self: 'a;

    /// Start a transaction. At most one writer exists at a time; beginning a
    /// second one blocks until the first ends.
    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError>;
}

/// A transaction over one consistent snapshot
///
/// Writes are visible to later reads of the same transaction and to nobody
/// else until [`commit`](StoreTransaction::commit).
pub trait StoreTransaction {
    // Schema
    fn create_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<(), StoreError>;
    /// Returns `false` if the table did not exist
    fn drop_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<bool, StoreError>;
    fn has_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<bool, StoreError>;

    // Reads
    fn get<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    /// First entry with a key `>= key`
    fn seek<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<Option<Entry>, StoreError>;
    /// First entry with a key `> key`
    fn next_after<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
    ) -> Result<Option<Entry>, StoreError>;
    /// Last entry with a key `< key`
    fn prev_before<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
    ) -> Result<Option<Entry>, StoreError>;
    fn first<O: KeyOrder>(&self, table: &Table<O>) -> Result<Option<Entry>, StoreError>;
    fn last<O: KeyOrder>(&self, table: &Table<O>) -> Result<Option<Entry>, StoreError>;

    // Writes
    fn put<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
        value: &[u8],
        flags: WriteFlags,
    ) -> Result<(), StoreError>;
    /// Returns `false` if the key was absent
    fn delete<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<bool, StoreError>;
    /// Remove every entry but keep the table
    fn truncate<O: KeyOrder>(&self, table: &Table<O>) -> Result<(), StoreError>;

    // Lifecycle
    fn is_read_only(&self) -> bool;
    fn commit(self) -> Result<(), StoreError>;
    fn abort(self) -> Result<(), StoreError>;
}

/// Conformance checks shared by the backend test modules
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::key::{SegmentKey, SegmentKeyOrder};
    use crate::{SeriesId, Timestamp};

    pub const DATA: Table<SegmentKeyOrder> = Table::new("t");

    pub fn key(series: u128, ticks: i64) -> Vec<u8> {
        SegmentKey::new(SeriesId::from_u128(series), Timestamp::from_ticks(ticks))
            .encode()
            .to_vec()
    }

    fn ticks(entry: Option<Entry>) -> Option<i64> {
        entry.map(|e| SegmentKey::decode(&e.key).unwrap().timestamp.ticks())
    }

    /// Neighbour lookups follow the table ordering, not raw bytes
    pub fn ordered_lookups<S: Store>(store: &S) {
        let txn = store.begin(false).unwrap();
        txn.create_table(&DATA).unwrap();
        for ts in [256, -1, 1, 255, 1000] {
            txn.put(&DATA, &key(1, ts), b"v", WriteFlags::Default).unwrap();
        }
        txn.put(&DATA, &key(2, 0), b"other", WriteFlags::Default).unwrap();

        assert_eq!(ticks(txn.first(&DATA).unwrap()), Some(-1));
        assert_eq!(ticks(txn.seek(&DATA, &key(1, 2)).unwrap()), Some(255));
        assert_eq!(ticks(txn.seek(&DATA, &key(1, 255)).unwrap()), Some(255));
        assert_eq!(ticks(txn.next_after(&DATA, &key(1, 255)).unwrap()), Some(256));
        assert_eq!(ticks(txn.prev_before(&DATA, &key(1, 255)).unwrap()), Some(1));
        assert_eq!(txn.prev_before(&DATA, &key(1, -1)).unwrap(), None);
        assert_eq!(
            txn.seek(&DATA, &key(1, 1001)).unwrap().unwrap().key,
            key(2, 0)
        );
        assert_eq!(txn.last(&DATA).unwrap().unwrap().value, b"other".to_vec());
        txn.commit().unwrap();
    }

    /// Writes become visible to others only on commit
    pub fn commit_and_abort<S: Store>(store: &S) {
        let txn = store.begin(false).unwrap();
        txn.create_table(&DATA).unwrap();
        txn.put(&DATA, &key(1, 1), b"a", WriteFlags::Default).unwrap();
        assert_eq!(txn.get(&DATA, &key(1, 1)).unwrap(), Some(b"a".to_vec()));
        txn.commit().unwrap();

        let txn = store.begin(false).unwrap();
        txn.put(&DATA, &key(1, 2), b"b", WriteFlags::Default).unwrap();
        assert!(txn.delete(&DATA, &key(1, 1)).unwrap());
        assert!(!txn.delete(&DATA, &key(1, 9)).unwrap());
        txn.abort().unwrap();

        let read = store.begin(true).unwrap();
        assert!(read.is_read_only());
        assert_eq!(read.get(&DATA, &key(1, 1)).unwrap(), Some(b"a".to_vec()));
        assert_eq!(read.get(&DATA, &key(1, 2)).unwrap(), None);
        assert!(matches!(
            read.put(&DATA, &key(1, 3), b"c", WriteFlags::Default),
            Err(StoreError::ReadOnly)
        ));
    }

    pub fn no_overwrite<S: Store>(store: &S) {
        let txn = store.begin(false).unwrap();
        txn.create_table(&DATA).unwrap();
        txn.put(&DATA, &key(1, 1), b"a", WriteFlags::NoOverwrite).unwrap();
        assert!(matches!(
            txn.put(&DATA, &key(1, 1), b"b", WriteFlags::NoOverwrite),
            Err(StoreError::KeyExists)
        ));
        txn.put(&DATA, &key(1, 1), b"c", WriteFlags::Default).unwrap();
        assert_eq!(txn.get(&DATA, &key(1, 1)).unwrap(), Some(b"c".to_vec()));
        txn.commit().unwrap();
    }

    pub fn table_lifecycle<S: Store>(store: &S) {
        let txn = store.begin(false).unwrap();
        assert!(!txn.has_table(&DATA).unwrap());
        txn.create_table(&DATA).unwrap();
        assert!(txn.has_table(&DATA).unwrap());
        txn.put(&DATA, &key(1, 1), b"a", WriteFlags::Default).unwrap();
        txn.truncate(&DATA).unwrap();
        assert!(txn.has_table(&DATA).unwrap());
        assert_eq!(txn.first(&DATA).unwrap(), None);
        txn.put(&DATA, &key(1, 2), b"b", WriteFlags::Default).unwrap();
        txn.commit().unwrap();

        let txn = store.begin(false).unwrap();
        assert!(txn.drop_table(&DATA).unwrap());
        assert!(!txn.has_table(&DATA).unwrap());
        assert!(!txn.drop_table(&DATA).unwrap());
        txn.commit().unwrap();

        let read = store.begin(true).unwrap();
        assert!(matches!(
            read.get(&DATA, &key(1, 2)),
            Err(StoreError::TableNotFound(_))
        ));
    }

    /// A reader keeps its snapshot while a writer commits
    pub fn snapshot_isolation<S: Store>(store: &S) {
        let txn = store.begin(false).unwrap();
        txn.create_table(&DATA).unwrap();
        txn.put(&DATA, &key(1, 1), b"old", WriteFlags::Default).unwrap();
        txn.commit().unwrap();

        let reader = store.begin(true).unwrap();
        let writer = store.begin(false).unwrap();
        writer.put(&DATA, &key(1, 1), b"new", WriteFlags::Default).unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.get(&DATA, &key(1, 1)).unwrap(), Some(b"old".to_vec()));
        drop(reader);

        let reader = store.begin(true).unwrap();
        assert_eq!(reader.get(&DATA, &key(1, 1)).unwrap(), Some(b"new".to_vec()));
    }
}

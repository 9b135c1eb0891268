use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition, TableHandle, TypeName};
use tracing::{info, warn};

use super::{Entry, Store, StoreError, StoreTransaction, WriteFlags};
use crate::config::DATABASE_SIZE_WARN_RATIO;
use crate::key::{KeyOrder, Table};

/// Byte-string key type whose ordering comes from `O`
#[derive(Debug)]
pub struct OrderedBytes<O: KeyOrder>(PhantomData<O>);

impl<O: KeyOrder> redb::Value for OrderedBytes<O> {
    type SelfType<'a> = &'a [u8]
    where
        Self: 'a;
    type AsBytes<'a> = &'a [u8]
    where
        Self: 'a;

    fn fixed_width() -> Option<usize> {
        None
    }

    fn from_bytes<'a>(data: &'a [u8]) -> &'a [u8]
    where
        Self: 'a,
    {
        data
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a &'b [u8]) -> &'a [u8]
    where
        Self: 'b,
    {
        value
    }

    fn type_name() -> TypeName {
        TypeName::new(O::NAME)
    }
}

impl<O: KeyOrder> redb::Key for OrderedBytes<O> {
    fn compare(data1: &[u8], data2: &[u8]) -> Ordering {
        O::compare(data1, data2)
    }
}

type Definition<'a, O> = TableDefinition<'a, OrderedBytes<O>, &'static [u8]>;

fn definition<O: KeyOrder>(table: &Table<O>) -> Definition<'static, O> {
    TableDefinition::new(table.name())
}

fn table_error(e: redb::TableError, name: &str) -> StoreError {
    match e {
        redb::TableError::TableDoesNotExist(_) => StoreError::TableNotFound(name.to_string()),
        e => StoreError::storage(e),
    }
}

fn entry<O: KeyOrder>(
    (key, value): (
        redb::AccessGuard<'_, OrderedBytes<O>>,
        redb::AccessGuard<'_, &'static [u8]>,
    ),
) -> Entry {
    Entry::new(key.value().to_vec(), value.value().to_vec())
}

/// File-backed store on a single redb database
pub struct RedbStore {
    db: Database,
    path: PathBuf,
    max_size: u64,
}

impl RedbStore {
    /// Database file name inside the data directory
    pub const FILE_NAME: &'static str = "tickdb.redb";

    /// Open or create the database in `dir`
    pub fn open(dir: &Path, max_size: u64) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(StoreError::storage)?;
        let path = dir.join(Self::FILE_NAME);
        let db = Database::create(&path).map_err(StoreError::storage)?;
        info!("Opened redb database at {:?}", path);
        Ok(Self { db, path, max_size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the database file in bytes
    pub fn file_size(&self) -> Result<u64, StoreError> {
        let metadata = std::fs::metadata(&self.path).map_err(StoreError::storage)?;
        Ok(metadata.len())
    }

    fn check_size(&self) -> Result<(), StoreError> {
        let size = self.file_size()?;
        if size >= self.max_size {
            return Err(StoreError::DatabaseFull {
                size,
                limit: self.max_size,
            });
        }
        if size as f64 >= self.max_size as f64 * DATABASE_SIZE_WARN_RATIO {
            warn!(
                "Database {:?} is at {} of {} bytes",
                self.path, size, self.max_size
            );
        }
        Ok(())
    }
}

impl Store for RedbStore {
    type Txn<'a> = RedbTransaction<'a>;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError> {
        let inner = if read_only {
            Inner::Read(self.db.begin_read().map_err(StoreError::storage)?)
        } else {
            self.check_size()?;
            Inner::Write(self.db.begin_write().map_err(StoreError::storage)?)
        };
        Ok(RedbTransaction {
            inner,
            _store: PhantomData,
        })
    }
}

enum Inner {
    Read(redb::ReadTransaction),
    Write(redb::WriteTransaction),
}

pub struct RedbTransaction<'db> {
    inner: Inner,
    _store: PhantomData<&'db RedbStore>,
}

/// Run `$body` with `$t` bound to a readable handle of `$table`
macro_rules! with_table {
    ($self:expr, $table:expr, |$t:ident| $body:expr) => {
        match &$self.inner {
            Inner::Read(txn) => {
                let $t = txn
                    .open_table(definition($table))
                    .map_err(|e| table_error(e, $table.name()))?;
                $body
            }
            Inner::Write(txn) => {
                let $t = txn
                    .open_table(definition($table))
                    .map_err(|e| table_error(e, $table.name()))?;
                $body
            }
        }
    };
}

impl<'db> RedbTransaction<'db> {
    fn writer(&self) -> Result<&redb::WriteTransaction, StoreError> {
        match &self.inner {
            Inner::Write(txn) => Ok(txn),
            Inner::Read(_) => Err(StoreError::ReadOnly),
        }
    }
}

impl<'db> StoreTransaction for RedbTransaction<'db> {
    fn create_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<(), StoreError> {
        let txn = self.writer()?;
        txn.open_table(definition(table))
            .map_err(|e| table_error(e, table.name()))?;
        Ok(())
    }

    fn drop_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<bool, StoreError> {
        let txn = self.writer()?;
        txn.delete_table(definition(table))
            .map_err(|e| table_error(e, table.name()))
    }

    fn has_table<O: KeyOrder>(&self, table: &Table<O>) -> Result<bool, StoreError> {
        let found = match &self.inner {
            Inner::Read(txn) => txn
                .list_tables()
                .map_err(StoreError::storage)?
                .any(|handle| handle.name() == table.name()),
            Inner::Write(txn) => txn
                .list_tables()
                .map_err(StoreError::storage)?
                .any(|handle| handle.name() == table.name()),
        };
        Ok(found)
    }

    fn get<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        with_table!(self, table, |t| {
            let value = t.get(key).map_err(StoreError::storage)?;
            Ok(value.map(|v| v.value().to_vec()))
        })
    }

    fn seek<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<Option<Entry>, StoreError> {
        with_table!(self, table, |t| {
            let found = t
                .range::<&[u8]>((Bound::Included(key), Bound::Unbounded))
                .map_err(StoreError::storage)?
                .next()
                .transpose()
                .map_err(StoreError::storage)?;
            Ok(found.map(entry))
        })
    }

    fn next_after<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
    ) -> Result<Option<Entry>, StoreError> {
        with_table!(self, table, |t| {
            let found = t
                .range::<&[u8]>((Bound::Excluded(key), Bound::Unbounded))
                .map_err(StoreError::storage)?
                .next()
                .transpose()
                .map_err(StoreError::storage)?;
            Ok(found.map(entry))
        })
    }

    fn prev_before<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
    ) -> Result<Option<Entry>, StoreError> {
        with_table!(self, table, |t| {
            let found = t
                .range::<&[u8]>((Bound::Unbounded, Bound::Excluded(key)))
                .map_err(StoreError::storage)?
                .next_back()
                .transpose()
                .map_err(StoreError::storage)?;
            Ok(found.map(entry))
        })
    }

    fn first<O: KeyOrder>(&self, table: &Table<O>) -> Result<Option<Entry>, StoreError> {
        with_table!(self, table, |t| {
            let found = t.first().map_err(StoreError::storage)?;
            Ok(found.map(entry))
        })
    }

    fn last<O: KeyOrder>(&self, table: &Table<O>) -> Result<Option<Entry>, StoreError> {
        with_table!(self, table, |t| {
            let found = t.last().map_err(StoreError::storage)?;
            Ok(found.map(entry))
        })
    }

    fn put<O: KeyOrder>(
        &self,
        table: &Table<O>,
        key: &[u8],
        value: &[u8],
        flags: WriteFlags,
    ) -> Result<(), StoreError> {
        let txn = self.writer()?;
        let mut t = txn
            .open_table(definition(table))
            .map_err(|e| table_error(e, table.name()))?;
        if flags == WriteFlags::NoOverwrite && t.get(key).map_err(StoreError::storage)?.is_some() {
            return Err(StoreError::KeyExists);
        }
        t.insert(key, value).map_err(StoreError::storage)?;
        Ok(())
    }

    fn delete<O: KeyOrder>(&self, table: &Table<O>, key: &[u8]) -> Result<bool, StoreError> {
        let txn = self.writer()?;
        let mut t = txn
            .open_table(definition(table))
            .map_err(|e| table_error(e, table.name()))?;
        let removed = t.remove(key).map_err(StoreError::storage)?.is_some();
        Ok(removed)
    }

    fn truncate<O: KeyOrder>(&self, table: &Table<O>) -> Result<(), StoreError> {
        let txn = self.writer()?;
        txn.delete_table(definition(table))
            .map_err(|e| table_error(e, table.name()))?;
        txn.open_table(definition(table))
            .map_err(|e| table_error(e, table.name()))?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        matches!(self.inner, Inner::Read(_))
    }

    fn commit(self) -> Result<(), StoreError> {
        match self.inner {
            Inner::Write(txn) => txn.commit().map_err(StoreError::storage),
            Inner::Read(_) => Ok(()),
        }
    }

    fn abort(self) -> Result<(), StoreError> {
        match self.inner {
            Inner::Write(txn) => txn.abort().map_err(StoreError::storage),
            Inner::Read(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use tempfile::TempDir;

    const LIMIT: u64 = 1 << 40;

    fn open(dir: &TempDir) -> RedbStore {
        RedbStore::open(dir.path(), LIMIT).unwrap()
    }

    #[test]
    fn test_ordered_lookups() {
        let dir = TempDir::new().unwrap();
        conformance::ordered_lookups(&open(&dir));
    }

    #[test]
    fn test_commit_and_abort() {
        let dir = TempDir::new().unwrap();
        conformance::commit_and_abort(&open(&dir));
    }

    #[test]
    fn test_no_overwrite() {
        let dir = TempDir::new().unwrap();
        conformance::no_overwrite(&open(&dir));
    }

    #[test]
    fn test_table_lifecycle() {
        let dir = TempDir::new().unwrap();
        conformance::table_lifecycle(&open(&dir));
    }

    #[test]
    fn test_snapshot_isolation() {
        let dir = TempDir::new().unwrap();
        conformance::snapshot_isolation(&open(&dir));
    }

    #[test]
    fn test_reopen_keeps_order() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            let txn = store.begin(false).unwrap();
            txn.create_table(&conformance::DATA).unwrap();
            for ts in [300, 2, 1] {
                txn.put(
                    &conformance::DATA,
                    &conformance::key(5, ts),
                    b"v",
                    WriteFlags::Default,
                )
                .unwrap();
            }
            txn.commit().unwrap();
        }

        let store = open(&dir);
        assert!(store.path().ends_with(RedbStore::FILE_NAME));
        let txn = store.begin(true).unwrap();
        let first = txn.first(&conformance::DATA).unwrap().unwrap();
        assert_eq!(first.key, conformance::key(5, 1));
        let next = txn
            .next_after(&conformance::DATA, &first.key)
            .unwrap()
            .unwrap();
        assert_eq!(next.key, conformance::key(5, 2));
    }

    #[test]
    fn test_database_full() {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path(), 1).unwrap();
        assert!(matches!(
            store.begin(false),
            Err(StoreError::DatabaseFull { limit: 1, .. })
        ));
        assert!(store.begin(true).is_ok());
    }
}

use super::{Entry, StoreError, StoreTransaction, WriteFlags};
use crate::key::{KeyOrder, Table};
use std::cmp::Ordering;

/// Positioned cursor over one table of a transaction
///
/// Built on the transaction's neighbour lookups, so it never holds a borrow of
/// backend pages between calls. After [`delete`](StoreCursor::delete) the
/// cursor is unpositioned but `move_next`/`move_previous` continue from the
/// deleted key.
pub struct StoreCursor<'t, T: StoreTransaction, O: KeyOrder> {
    txn: &'t T,
    table: Table<O>,
    current: Option<Entry>,
    anchor: Option<Vec<u8>>,
}

impl<'t, T: StoreTransaction, O: KeyOrder> StoreCursor<'t, T, O> {
    pub fn new(txn: &'t T, table: Table<O>) -> Self {
        Self {
            txn,
            table,
            current: None,
            anchor: None,
        }
    }

    pub fn table(&self) -> &Table<O> {
        &self.table
    }

    fn position(&mut self, entry: Option<Entry>) -> bool {
        match entry {
            Some(entry) => {
                self.anchor = Some(entry.key.clone());
                self.current = Some(entry);
                true
            }
            None => false,
        }
    }

    /// Position at the first key `>= key`; returns whether it equals `key`
    pub fn search(&mut self, key: &[u8]) -> Result<bool, StoreError> {
        let entry = self.txn.seek(&self.table, key)?;
        let exact = entry
            .as_ref()
            .map_or(false, |e| self.table.compare(&e.key, key) == Ordering::Equal);
        if !self.position(entry) {
            self.unposition();
        }
        Ok(exact)
    }

    /// Position at exactly `key`
    pub fn move_to(&mut self, key: &[u8]) -> Result<bool, StoreError> {
        match self.txn.get(&self.table, key)? {
            Some(value) => Ok(self.position(Some(Entry::new(key, value)))),
            None => Ok(false),
        }
    }

    pub fn move_first(&mut self) -> Result<bool, StoreError> {
        let entry = self.txn.first(&self.table)?;
        Ok(self.position(entry))
    }

    pub fn move_last(&mut self) -> Result<bool, StoreError> {
        let entry = self.txn.last(&self.table)?;
        Ok(self.position(entry))
    }

    /// Step forward; an unpositioned cursor moves to the first key
    pub fn move_next(&mut self) -> Result<bool, StoreError> {
        let entry = match &self.anchor {
            Some(key) => self.txn.next_after(&self.table, key)?,
            None => self.txn.first(&self.table)?,
        };
        Ok(self.position(entry))
    }

    /// Step back; an unpositioned cursor moves to the last key
    pub fn move_previous(&mut self) -> Result<bool, StoreError> {
        let entry = match &self.anchor {
            Some(key) => self.txn.prev_before(&self.table, key)?,
            None => self.txn.last(&self.table)?,
        };
        Ok(self.position(entry))
    }

    pub fn is_positioned(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|e| e.key.as_slice())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|e| e.value.as_slice())
    }

    /// Write `key` and position the cursor on it
    pub fn write(&mut self, key: &[u8], value: &[u8], flags: WriteFlags) -> Result<(), StoreError> {
        self.txn.put(&self.table, key, value, flags)?;
        self.position(Some(Entry::new(key, value)));
        Ok(())
    }

    /// Delete the entry under the cursor
    pub fn delete(&mut self) -> Result<bool, StoreError> {
        match self.current.take() {
            Some(entry) => self.txn.delete(&self.table, &entry.key),
            None => Ok(false),
        }
    }

    /// Forget the current position
    pub fn unposition(&mut self) {
        self.current = None;
        self.anchor = None;
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::store::conformance::{key, DATA};
    use crate::store::{MemoryStore, Store};

    #[test]
    fn test_cursor_navigation() {
        let store = MemoryStore::new();
        let txn = store.begin(false).unwrap();
        txn.create_table(&DATA).unwrap();
        for ts in [10, 20, 30] {
            txn.put(&DATA, &key(1, ts), &ts.to_le_bytes(), WriteFlags::Default)
                .unwrap();
        }

        let mut cursor = StoreCursor::new(&txn, DATA);
        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.key(), Some(key(1, 10).as_slice()));

        assert!(!cursor.search(&key(1, 15)).unwrap());
        assert_eq!(cursor.key(), Some(key(1, 20).as_slice()));
        assert!(cursor.search(&key(1, 30)).unwrap());

        assert!(!cursor.move_next().unwrap());
        // position kept at the end
        assert_eq!(cursor.key(), Some(key(1, 30).as_slice()));
        assert!(cursor.move_previous().unwrap());
        assert_eq!(cursor.value(), Some(20i64.to_le_bytes().as_slice()));

        assert!(!cursor.search(&key(1, 31)).unwrap());
        assert!(!cursor.is_positioned());
        assert!(cursor.move_previous().unwrap());
        assert_eq!(cursor.key(), Some(key(1, 30).as_slice()));
    }

    #[test]
    fn test_cursor_write_and_delete() {
        let store = MemoryStore::new();
        let txn = store.begin(false).unwrap();
        txn.create_table(&DATA).unwrap();

        let mut cursor = StoreCursor::new(&txn, DATA);
        cursor.write(&key(1, 1), b"a", WriteFlags::Default).unwrap();
        cursor.write(&key(1, 2), b"b", WriteFlags::Default).unwrap();
        cursor.write(&key(1, 3), b"c", WriteFlags::Default).unwrap();
        assert!(matches!(
            cursor.write(&key(1, 3), b"x", WriteFlags::NoOverwrite),
            Err(StoreError::KeyExists)
        ));

        assert!(cursor.move_to(&key(1, 2)).unwrap());
        assert!(cursor.delete().unwrap());
        assert!(!cursor.is_positioned());
        assert!(!cursor.delete().unwrap());

        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.value(), Some(b"c".as_slice()));
        assert!(cursor.move_previous().unwrap());
        assert_eq!(cursor.value(), Some(b"a".as_slice()));
        assert!(!cursor.move_to(&key(1, 2)).unwrap());
    }
}

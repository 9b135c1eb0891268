//! Segment engine - tables, bootstrap and transactions

mod cache;
mod cursor;
mod transaction;

pub use cache::Cardinality;
pub use cursor::{CursorState, Scan, SeriesCursor};
pub use transaction::Transaction;

use crate::config;
use crate::key::{SegmentKeyOrder, SeriesIdOrder, Table};
use crate::store::{Store, StoreTransaction, WriteFlags};
use crate::{Result, SeriesId, TickError, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[cfg(feature = "memory")]
use crate::store::MemoryStore;
#[cfg(feature = "redb")]
use crate::store::RedbStore;

/// Object metadata table, keyed by series id
pub(crate) const OBJECTS: Table<SeriesIdOrder> = Table::new(config::OBJECT_TABLE);

/// Series data table, keyed by segment key
pub(crate) const DATA: Table<SegmentKeyOrder> = Table::new(config::DATA_TABLE);

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database directory
    pub data_dir: PathBuf,
    /// Drop and recreate the tables instead of opening them
    pub create: bool,
    /// Write transactions are refused once the database file reaches this size
    pub max_database_size: u64,
    /// Points per segment; fixed for the lifetime of a database
    pub segment_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(config::DEFAULT_DATA_DIR),
            create: false,
            max_database_size: config::DEFAULT_MAX_DATABASE_SIZE,
            segment_capacity: config::DEFAULT_SEGMENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let range = config::MIN_SEGMENT_CAPACITY..=config::MAX_SEGMENT_CAPACITY;
        if !range.contains(&self.segment_capacity) {
            return Err(TickError::Config(format!(
                "Segment capacity {} outside {}..={}",
                self.segment_capacity,
                config::MIN_SEGMENT_CAPACITY,
                config::MAX_SEGMENT_CAPACITY
            )));
        }
        if self.max_database_size == 0 {
            return Err(TickError::Config(
                "Maximum database size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Engine-wide metadata, stored under the nil series id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMeta {
    pub format_version: u32,
    pub segment_capacity: usize,
}

/// Descriptive metadata of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SeriesInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Layout of one stored segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    /// Key timestamp, equal to `first` in a consistent database
    pub key: Timestamp,
    pub len: usize,
    pub first: Timestamp,
    pub last: Timestamp,
}

/// Time-series engine over a key-value store
pub struct Engine<S: Store> {
    store: S,
    config: EngineConfig,
}

#[cfg(feature = "redb")]
impl Engine<RedbStore> {
    /// Open (or with `config.create`, initialize) the database in `config.data_dir`
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = RedbStore::open(&config.data_dir, config.max_database_size)?;
        Self::with_store(store, config)
    }
}

#[cfg(feature = "memory")]
impl Engine<MemoryStore> {
    /// Create a fresh engine backed by memory
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let config = EngineConfig {
            create: true,
            ..config
        };
        Self::with_store(MemoryStore::new(), config)
    }
}

impl<S: Store> Engine<S> {
    /// Bootstrap an engine on an existing store
    pub fn with_store(store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let engine = Self { store, config };
        if engine.config.create {
            engine.create_tables()?;
        } else {
            engine.check_tables()?;
        }
        Ok(engine)
    }

    fn meta(&self) -> EngineMeta {
        EngineMeta {
            format_version: config::FORMAT_VERSION,
            segment_capacity: self.config.segment_capacity,
        }
    }

    fn create_tables(&self) -> Result<()> {
        let txn = self.store.begin(false)?;
        txn.drop_table(&OBJECTS)?;
        txn.drop_table(&DATA)?;
        txn.create_table(&OBJECTS)?;
        txn.create_table(&DATA)?;
        write_meta(&txn, &self.meta())?;
        txn.commit()?;

        info!(
            "Created tables with segment capacity {}",
            self.config.segment_capacity
        );
        Ok(())
    }

    fn check_tables(&self) -> Result<()> {
        let txn = self.store.begin(true)?;
        if !txn.has_table(&OBJECTS)? || !txn.has_table(&DATA)? {
            return Err(TickError::Config(format!(
                "Database at {:?} is not initialized",
                self.config.data_dir
            )));
        }

        let meta = txn
            .get(&OBJECTS, &SeriesId::nil().to_bytes())?
            .ok_or_else(|| TickError::InvalidFormat("Missing engine metadata".into()))?;
        let meta: EngineMeta = serde_json::from_slice(&meta)?;
        txn.commit()?;

        if meta.format_version != config::FORMAT_VERSION {
            return Err(TickError::InvalidFormat(format!(
                "Unsupported format version {}",
                meta.format_version
            )));
        }
        if meta.segment_capacity != self.config.segment_capacity {
            return Err(TickError::Config(format!(
                "Database was created with segment capacity {}, configured {}",
                meta.segment_capacity, self.config.segment_capacity
            )));
        }

        info!(
            "Opened tables with segment capacity {}",
            meta.segment_capacity
        );
        Ok(())
    }

    /// Begin a read-write transaction
    pub fn begin_transaction(&self) -> Result<Transaction<'_, S>> {
        let txn = self.store.begin(false)?;
        Ok(Transaction::new(self, txn))
    }

    /// Begin a read-only transaction
    pub fn begin_read(&self) -> Result<Transaction<'_, S>> {
        let txn = self.store.begin(true)?;
        Ok(Transaction::new(self, txn))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn segment_capacity(&self) -> usize {
        self.config.segment_capacity
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

pub(crate) fn write_meta<T: StoreTransaction>(txn: &T, meta: &EngineMeta) -> Result<()> {
    let value = serde_json::to_vec(meta)?;
    txn.put(
        &OBJECTS,
        &SeriesId::nil().to_bytes(),
        &value,
        WriteFlags::Default,
    )?;
    Ok(())
}

//! TickDB Core - Segmented Time-Series Storage Engine
//!
//! Stores append-mostly, timestamp-ordered numeric series on top of an
//! embedded, transactional, ordered key-value store.
//!
//! # Architecture
//!
//! - **Segment**: fixed-capacity ordered block of points, one store value each
//! - **SegmentKey**: `(series, first timestamp)` composite key with a custom ordering
//! - **Store**: the key-value backend (`redb` on disk or an in-memory snapshot map)
//! - **Transaction**: per-series caches holding one modification buffer each,
//!   flushed to the store on commit
//! - **SeriesCursor**: insert/search/move/scan over one series
//!
//! Every segment but the last of a series is full, and a segment's key is the
//! timestamp of its first point.

pub mod engine;
pub mod key;
pub mod segment;
pub mod store;

mod error;
mod types;

pub use engine::{
    Cardinality, CursorState, Engine, EngineConfig, EngineMeta, Scan, SegmentInfo, SeriesCursor,
    SeriesInfo, Transaction,
};
pub use error::{Result, TickError};
pub use key::SegmentKey;
pub use segment::{CompareResult, SearchResult, Segment};
pub use types::*;

/// TickDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Points per segment
    pub const DEFAULT_SEGMENT_CAPACITY: usize = 8100;

    /// Smallest usable segment capacity
    pub const MIN_SEGMENT_CAPACITY: usize = 2;

    /// Largest segment capacity (24 MiB segment values)
    pub const MAX_SEGMENT_CAPACITY: usize = 1024 * 1024;

    /// Maximum database file size (500 GiB)
    pub const DEFAULT_MAX_DATABASE_SIZE: u64 = 500 * 1024 * 1024 * 1024;

    /// Fraction of the size limit at which a warning is logged
    pub const DATABASE_SIZE_WARN_RATIO: f64 = 0.9;

    /// Default database directory
    pub const DEFAULT_DATA_DIR: &str = "data";

    /// Engine metadata format version
    pub const FORMAT_VERSION: u32 = 1;

    /// Object metadata table
    pub const OBJECT_TABLE: &str = "o";

    /// Series data table
    pub const DATA_TABLE: &str = "t";
}

//! Error types for TickDB

use crate::store::StoreError;
use crate::SeriesId;
use thiserror::Error;

/// Result type alias for TickDB operations
pub type Result<T> = std::result::Result<T, TickError>;

/// TickDB error types
#[derive(Error, Debug)]
pub enum TickError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying key-value store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The on-disk layout contradicts the segment invariants
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// A series expected to have stored segments has none
    #[error("Timeseries not found: {0}")]
    SeriesNotFound(SeriesId),

    /// The series is already bound to another cursor in this transaction
    #[error("Timeseries {0} is already open in this transaction")]
    SeriesBusy(SeriesId),

    /// The cursor is not bound to a series
    #[error("Cursor is closed")]
    CursorClosed,

    /// Write attempted through a read-only transaction
    #[error("Transaction is read-only")]
    ReadOnly,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TickError {
    /// Check if the error leaves the enclosing transaction unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TickError::Invariant(_) | TickError::SeriesNotFound(_)
        ) || self.is_corruption()
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TickError::Corruption(_) | TickError::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TickError::Invariant("lost cursor".into()).is_fatal());
        assert!(TickError::SeriesNotFound(SeriesId::nil()).is_fatal());
        assert!(TickError::ChecksumMismatch { expected: 1, actual: 2 }.is_fatal());
        assert!(!TickError::SeriesBusy(SeriesId::nil()).is_fatal());
        assert!(!TickError::ReadOnly.is_corruption());
    }
}

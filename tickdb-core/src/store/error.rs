use thiserror::Error;

/// Errors raised by a key-value backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transaction already consumed")]
    TransactionConsumed,

    #[error("cannot write in a read-only transaction")]
    ReadOnly,

    #[error("key already exists")]
    KeyExists,

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("database is full: {size} bytes, limit {limit} bytes")]
    DatabaseFull { size: u64, limit: u64 },

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        StoreError::Storage(e.to_string())
    }
}

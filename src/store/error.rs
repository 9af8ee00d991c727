//! Error types for the fingerprint store

use crate::error::Error as CrateError;
use thiserror::Error;

/// Error type for fingerprint store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// LibSQL error
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(String),

    /// SQL query error
    #[error("SQL query error: {0}")]
    Query(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The store was used after `close`
    #[error("Store is closed")]
    Closed,

    /// Filesystem error while removing the store file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for CrateError {
    fn from(err: StoreError) -> Self {
        CrateError::Store(err.to_string())
    }
}

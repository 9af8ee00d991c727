//! Error types for the dedup module

use crate::error::Error as CrateError;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for conversion and document writes
#[derive(Debug, Error)]
pub enum DedupError {
    /// HTML conversion produced nothing usable
    #[error("Conversion error: {0}")]
    Convert(String),

    /// Writing the document failed
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Destination of the failed write
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// URL has no host to derive a document key from
    #[error("Invalid document URL: {0}")]
    InvalidUrl(String),
}

impl From<DedupError> for CrateError {
    fn from(err: DedupError) -> Self {
        CrateError::Dedup(err.to_string())
    }
}

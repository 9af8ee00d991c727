//! Error types for the sitedigest crate

use thiserror::Error;

/// Result type for sitedigest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sitedigest operations
///
/// Only startup failures surface through this type to the caller of a run.
/// Per-site, per-strategy, per-document and per-store-operation failures are
/// logged where they happen and absorbed.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fingerprint store error
    #[error("Store error: {0}")]
    Store(String),

    /// Web crawling error
    #[error("Crawl error: {0}")]
    Crawl(String),

    /// Deduplication or document write error
    #[error("Dedup error: {0}")]
    Dedup(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

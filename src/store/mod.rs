//! # Fingerprint Store Module
//!
//! This module holds the set of content fingerprints seen during a run. Every
//! site session shares the same store, so both backends do their own locking
//! and expose the same `HashStore` contract.
//!
//! ## Key Components
//!
//! - `Fingerprint`: SHA-256 digest of a content segment, hex encoded
//! - `HashStore`: the add/exists/close contract shared by all backends
//! - `MemoryStore`: transient backend, a lock-guarded `HashSet`
//! - `DurableStore`: single-file libsql backend tuned for bulk inserts
//! - `StoreBackend`: configuration value selecting one of the above
//!
//! ## Consistency
//!
//! A fingerprint is visible to `exists` from every task once `add` for it has
//! returned. `exists` followed by `add` is not atomic; callers that need an
//! atomic check-and-set use `insert_if_absent`.

mod durable;
pub mod error;
mod memory;
mod schema;

pub use durable::DurableStore;
pub use error::StoreError;
pub use memory::MemoryStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Digest of a content segment's exact bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a content segment
    pub fn of(segment: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(segment.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex representation, as persisted by the durable backend
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concurrency-safe set of fingerprints
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Record a fingerprint. Adding one that is already present is a no-op.
    async fn add(&self, fingerprint: &Fingerprint) -> Result<(), StoreError>;

    /// Whether a previous `add` of this fingerprint has completed
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError>;

    /// Record a fingerprint unless present. Returns `true` when it was newly recorded.
    async fn insert_if_absent(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError>;

    /// Record several fingerprints at once
    async fn add_batch(&self, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        for fingerprint in fingerprints {
            self.add(fingerprint).await?;
        }
        Ok(())
    }

    /// Release the underlying resources. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Which store backend a run uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process set, lost when the process exits
    Memory,

    /// libsql database file
    Durable {
        /// Path of the database file
        path: PathBuf,

        /// Remove the database file (and its WAL companions) on close
        remove_on_close: bool,
    },
}

impl StoreBackend {
    /// Durable store at a per-process path that is removed at the end of the run
    pub fn scratch() -> Self {
        StoreBackend::Durable {
            path: PathBuf::from(format!("hashes-{}.db", std::process::id())),
            remove_on_close: true,
        }
    }
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::scratch()
    }
}

/// Open the configured backend
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn HashStore>, StoreError> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Durable {
            path,
            remove_on_close,
        } => {
            let store = DurableStore::open(path, *remove_on_close).await?;
            Ok(Arc::new(store))
        }
    }
}

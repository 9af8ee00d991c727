//! # Fingerprint Store Schema
//!
//! The durable store is one table keyed on the fingerprint. Connections are
//! tuned for bulk inserts with fsync off and a WAL journal. A crash may lose
//! the most recent fingerprints.

use crate::store::error::StoreError;
use libsql::{Connection, params};

const PRAGMAS: [&str; 4] = [
    "PRAGMA synchronous = OFF",
    "PRAGMA journal_mode = WAL",
    "PRAGMA temp_store = MEMORY",
    "PRAGMA mmap_size = 30000000000",
];

/// Apply the bulk-insert tuning to a fresh connection
pub async fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    for pragma in PRAGMAS {
        // Some pragmas answer with a row, so go through `query` rather than `execute`.
        let mut rows = conn
            .query(pragma, params![])
            .await
            .map_err(|e| StoreError::Schema(format!("Failed to apply `{}`: {}", pragma, e)))?;
        while let Ok(Some(_)) = rows.next().await {}
    }
    Ok(())
}

/// Initialize the database schema
pub async fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS hashes (hash TEXT PRIMARY KEY)",
        params![],
    )
    .await
    .map_err(|e| StoreError::Schema(format!("Failed to create hashes table: {}", e)))?;

    Ok(())
}

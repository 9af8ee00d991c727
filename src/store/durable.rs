//! Durable fingerprint store backed by a local libsql database

use async_trait::async_trait;
use libsql::{Connection, Database, params};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::store::schema;
use crate::store::{Fingerprint, HashStore, StoreError};

const INSERT_SQL: &str = "INSERT OR IGNORE INTO hashes (hash) VALUES (?)";
const EXISTS_SQL: &str = "SELECT COUNT(1) FROM hashes WHERE hash = ?";

struct Handle {
    // Kept alive for as long as the connection is in use.
    _db: Database,
    conn: Connection,
}

/// Single-file fingerprint store
///
/// All statements go through one connection guarded by a mutex, so callers
/// never interleave on it.
pub struct DurableStore {
    path: PathBuf,
    remove_on_close: bool,
    handle: Mutex<Option<Handle>>,
}

impl DurableStore {
    /// Open (or create) the store at `path`
    ///
    /// Failing to open the file, tune the connection or create the table is
    /// fatal for a run, so every step is reported as an error here.
    #[instrument]
    pub async fn open(path: &Path, remove_on_close: bool) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open database: {}", e)))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to connect to database: {}", e)))?;

        schema::apply_pragmas(&conn).await?;
        schema::initialize_schema(&conn).await?;

        info!("Opened fingerprint store at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            remove_on_close,
            handle: Mutex::new(Some(Handle { _db: db, conn })),
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the database file and its WAL companions
    async fn remove_files(&self) -> Result<(), StoreError> {
        let base = self.path.as_os_str().to_owned();
        let mut candidates = vec![self.path.clone()];
        for suffix in ["-wal", "-shm"] {
            let mut name = base.clone();
            name.push(suffix);
            candidates.push(PathBuf::from(name));
        }

        for candidate in candidates {
            match tokio::fs::remove_file(&candidate).await {
                Ok(()) => debug!("Removed {}", candidate.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HashStore for DurableStore {
    async fn add(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.insert_if_absent(fingerprint).await.map(|_| ())
    }

    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(StoreError::Closed)?;

        let mut rows = handle
            .conn
            .query(EXISTS_SQL, params![fingerprint.as_str()])
            .await
            .map_err(|e| StoreError::Query(format!("Failed to check hash existence: {}", e)))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to read hash count: {}", e)))?
            .ok_or_else(|| StoreError::Query("No count returned".to_string()))?;

        let count: i64 = row
            .get(0)
            .map_err(|e| StoreError::Query(format!("Failed to read hash count: {}", e)))?;
        Ok(count > 0)
    }

    async fn insert_if_absent(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(StoreError::Closed)?;

        let inserted = handle
            .conn
            .execute(INSERT_SQL, params![fingerprint.as_str()])
            .await
            .map_err(|e| StoreError::Query(format!("Failed to insert hash: {}", e)))?;
        Ok(inserted > 0)
    }

    async fn add_batch(&self, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(StoreError::Closed)?;

        let tx = handle
            .conn
            .transaction()
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to start transaction: {}", e)))?;

        for fingerprint in fingerprints {
            if let Err(e) = tx.execute(INSERT_SQL, params![fingerprint.as_str()]).await {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Failed to roll back hash batch: {}", rollback);
                }
                return Err(StoreError::Query(format!("Failed to insert hash: {}", e)));
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let handle = self.handle.lock().await.take();
        if handle.is_none() {
            return Ok(());
        }
        drop(handle);

        if self.remove_on_close {
            self.remove_files().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_schema_is_created() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("hashes.db");
        let store = DurableStore::open(&path, false).await.unwrap();

        let guard = store.handle.lock().await;
        let conn = &guard.as_ref().unwrap().conn;
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name = 'hashes'",
                params![],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let name: String = row.get(0).unwrap();
        assert_eq!(name, "hashes");
    }

    #[tokio::test]
    async fn test_fingerprints_survive_reopen() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("hashes.db");
        let fingerprint = Fingerprint::of("persisted paragraph");

        let store = DurableStore::open(&path, false).await.unwrap();
        store.add(&fingerprint).await.unwrap();
        store.close().await.unwrap();
        assert!(path.exists());

        let reopened = DurableStore::open(&path, false).await.unwrap();
        assert!(reopened.exists(&fingerprint).await.unwrap());
        assert!(!reopened.exists(&Fingerprint::of("other")).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_removes_scratch_files() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("scratch.db");

        let store = DurableStore::open(&path, true).await.unwrap();
        store.add(&Fingerprint::of("a")).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());

        store.close().await.unwrap();
        assert!(!path.exists());
        assert!(!temp_dir.path().join("scratch.db-wal").exists());
        assert!(!temp_dir.path().join("scratch.db-shm").exists());

        // Closing twice is harmless
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_fails_for_missing_directory() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("missing").join("hashes.db");

        assert!(DurableStore::open(&path, false).await.is_err());
    }
}

//! Transient fingerprint store

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::store::{Fingerprint, HashStore, StoreError};

/// In-process fingerprint set
///
/// Lookups share a read lock; inserts take the write lock. `None` marks a
/// closed store.
#[derive(Debug)]
pub struct MemoryStore {
    hashes: RwLock<Option<HashSet<Fingerprint>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            hashes: RwLock::new(Some(HashSet::new())),
        }
    }

    /// Number of fingerprints held
    pub async fn len(&self) -> usize {
        self.hashes.read().await.as_ref().map_or(0, HashSet::len)
    }

    /// Whether the store holds no fingerprints
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn add(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.insert_if_absent(fingerprint).await.map(|_| ())
    }

    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let guard = self.hashes.read().await;
        let hashes = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(hashes.contains(fingerprint))
    }

    async fn insert_if_absent(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let mut guard = self.hashes.write().await;
        let hashes = guard.as_mut().ok_or(StoreError::Closed)?;
        Ok(hashes.insert(fingerprint.clone()))
    }

    async fn add_batch(&self, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        let mut guard = self.hashes.write().await;
        let hashes = guard.as_mut().ok_or(StoreError::Closed)?;
        hashes.extend(fingerprints.iter().cloned());
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.hashes.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_len_counts_distinct_fingerprints() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);

        store.add(&Fingerprint::of("a")).await.unwrap();
        store.add(&Fingerprint::of("a")).await.unwrap();
        store
            .add_batch(&[Fingerprint::of("b"), Fingerprint::of("c")])
            .await
            .unwrap();

        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_insert_if_absent_reports_novelty() {
        let store = MemoryStore::new();
        let fingerprint = Fingerprint::of("header");

        assert!(store.insert_if_absent(&fingerprint).await.unwrap());
        assert!(!store.insert_if_absent(&fingerprint).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_drops_contents() {
        let store = MemoryStore::new();
        store.add(&Fingerprint::of("a")).await.unwrap();
        store.close().await.unwrap();

        assert_eq!(store.len().await, 0);
        assert!(matches!(
            store.add(&Fingerprint::of("a")).await,
            Err(StoreError::Closed)
        ));
    }
}

//! Shared block cache for pack data.
//!
//! One cache instance is shared by every reader of a store. Maintenance
//! operations pre-warm it for freshly written packs so the first reader
//! after a repack does not pay a cold read against the backend.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::Result;

/// Cache of loaded pack bytes keyed by pack name.
#[derive(Debug, Default)]
pub struct BlockCache {
    slots: DashMap<String, Arc<Bytes>>,
}

impl BlockCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached bytes for `key`, loading them once if absent.
    ///
    /// Concurrent callers may race the load; the first completed insert
    /// wins and later loads of the same key are discarded.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error; nothing is cached in that case.
    pub async fn get_or_create<F, Fut>(&self, key: &str, load: F) -> Result<Arc<Bytes>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        if let Some(hit) = self.slots.get(key) {
            return Ok(Arc::clone(hit.value()));
        }

        let loaded = Arc::new(load().await?);
        let entry = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::clone(&loaded));
        Ok(Arc::clone(entry.value()))
    }

    /// Returns the cached bytes for `key` without loading.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<Bytes>> {
        self.slots.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Drops one cached pack.
    pub fn invalidate(&self, key: &str) {
        self.slots.remove(key);
    }

    /// Drops every cached pack.
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Number of cached packs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

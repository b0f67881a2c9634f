//! In-memory blob cache.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use transport_core::error::{Result, TransportError};

use super::{BlobCache, CacheReader};

/// Access counters of an [`InMemoryBlobCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub puts: usize,
}

/// Blob cache backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryBlobCache {
    entries: DashMap<String, Arc<[u8]>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    puts: AtomicUsize,
}

impl InMemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store bytes directly.
    pub fn insert(&self, digest: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.entries.insert(digest.into(), data.into());
    }
}

#[async_trait]
impl BlobCache for InMemoryBlobCache {
    async fn get(&self, digest: &str) -> Result<Option<CacheReader>> {
        let data = self.entries.get(digest).map(|entry| Arc::clone(entry.value()));
        match data {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Box::new(Cursor::new(data))))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, digest: &str, content: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let mut data = Vec::new();
        content.read_to_end(&mut data).await.map_err(|e| {
            TransportError::CacheWrite(format!("Failed to read content for {}: {}", digest, e))
        })?;
        let size = data.len() as u64;
        self.entries.insert(digest.to_string(), data.into());
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(size)
    }

    async fn contains(&self, digest: &str) -> Result<bool> {
        Ok(self.entries.contains_key(digest))
    }

    async fn remove(&self, digest: &str) -> Result<()> {
        self.entries.remove(digest);
        Ok(())
    }
}

//! Disk-backed content-addressed blob cache.
//!
//! Each blob is stored as one file named after its digest, so identical
//! layers shared across artifacts are only stored once on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWriteExt};
use transport_core::error::{Result, TransportError};

use super::{BlobCache, CacheReader};

/// Metadata for a cached blob entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    /// Blob digest (e.g., "sha256:abc123...")
    pub digest: String,
    /// Size of the blob in bytes
    pub size_bytes: u64,
    /// When this blob was cached (Unix timestamp)
    pub cached_at: i64,
    /// Last time this blob was read (Unix timestamp)
    pub last_accessed: i64,
}

/// Content-addressed cache on the local filesystem.
///
/// Blobs are stored as `cache_dir/<digest>` with `:` replaced by `_`.
/// Metadata is stored alongside as `<digest>.meta.json`. Writes land in a
/// temp file in the same directory and are renamed into place.
pub struct DiskBlobCache {
    /// Root directory for the cache (e.g., ~/.cache/component-transport/blobs)
    cache_dir: PathBuf,
}

impl DiskBlobCache {
    /// Create a new blob cache at the given directory.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| {
            TransportError::CacheWrite(format!(
                "Failed to create cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    /// Default cache location under the user cache directory.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("component-transport")
            .join("blobs")
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.cache_dir.join(Self::digest_to_filename(digest))
    }

    fn meta_path(&self, digest: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.meta.json", Self::digest_to_filename(digest)))
    }

    /// Remove a cached blob by digest.
    pub async fn invalidate(&self, digest: &str) -> Result<()> {
        for path in [self.blob_path(digest), self.meta_path(digest)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TransportError::CacheWrite(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    /// Prune the cache to stay within the given byte limit.
    ///
    /// Evicts least-recently-accessed entries first.
    /// Returns the number of entries evicted.
    pub async fn prune(&self, max_bytes: u64) -> Result<usize> {
        let mut entries = self.list_entries().await?;

        let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();
        if total_size <= max_bytes {
            return Ok(0);
        }

        // Oldest access first
        entries.sort_by_key(|e| e.last_accessed);

        let mut current_size = total_size;
        let mut evicted = 0;

        for entry in &entries {
            if current_size <= max_bytes {
                break;
            }
            self.invalidate(&entry.digest).await?;
            current_size = current_size.saturating_sub(entry.size_bytes);
            evicted += 1;

            tracing::debug!(
                digest = %entry.digest,
                size_bytes = entry.size_bytes,
                "Evicted cached blob"
            );
        }

        Ok(evicted)
    }

    /// List all cached blob entries with their metadata.
    pub async fn list_entries(&self) -> Result<Vec<BlobMeta>> {
        let mut entries = Vec::new();

        let mut read_dir = tokio::fs::read_dir(&self.cache_dir).await.map_err(|e| {
            TransportError::CacheRead(format!(
                "Failed to read cache directory {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;

        while let Some(entry) = read_dir.next_entry().await.map_err(|e| {
            TransportError::CacheRead(format!("Failed to read directory entry: {}", e))
        })? {
            let path = entry.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(".meta.json"));
            if !is_meta {
                continue;
            }
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                if let Ok(meta) = serde_json::from_str::<BlobMeta>(&content) {
                    entries.push(meta);
                }
            }
        }

        Ok(entries)
    }

    /// Get the total size of all cached blobs in bytes.
    pub async fn total_size(&self) -> Result<u64> {
        Ok(self.list_entries().await?.iter().map(|e| e.size_bytes).sum())
    }

    /// Bump `last_accessed`; failures are ignored since the blob itself is intact.
    async fn touch(&self, digest: &str) {
        let meta_path = self.meta_path(digest);
        if let Ok(content) = tokio::fs::read_to_string(&meta_path).await {
            if let Ok(mut meta) = serde_json::from_str::<BlobMeta>(&content) {
                meta.last_accessed = chrono::Utc::now().timestamp();
                if let Ok(json) = serde_json::to_string_pretty(&meta) {
                    let _ = tokio::fs::write(&meta_path, json).await;
                }
            }
        }
    }

    /// Convert a digest string to a safe file name.
    ///
    /// e.g., "sha256:abc123" → "sha256_abc123"
    fn digest_to_filename(digest: &str) -> String {
        digest.replace(&[':', '/', '\\'][..], "_")
    }
}

#[async_trait]
impl BlobCache for DiskBlobCache {
    async fn get(&self, digest: &str) -> Result<Option<CacheReader>> {
        let path = self.blob_path(digest);
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                self.touch(digest).await;
                Ok(Some(Box::new(file)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TransportError::CacheRead(format!(
                "Failed to open cached blob {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn put(&self, digest: &str, content: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let write_err = |e: std::io::Error| {
            TransportError::CacheWrite(format!("Failed to store blob {}: {}", digest, e))
        };

        let tmp = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(&self.cache_dir)
            .map_err(write_err)?;
        let mut file = tokio::fs::File::from_std(tmp.reopen().map_err(write_err)?);
        let size_bytes = tokio::io::copy(content, &mut file).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        let target = self.blob_path(digest);
        tmp.persist(&target)
            .map_err(|e| write_err(e.error))?;

        let now = chrono::Utc::now().timestamp();
        let meta = BlobMeta {
            digest: digest.to_string(),
            size_bytes,
            cached_at: now,
            last_accessed: now,
        };
        tokio::fs::write(self.meta_path(digest), serde_json::to_string_pretty(&meta)?)
            .await
            .map_err(write_err)?;

        tracing::debug!(
            digest = %digest,
            size_bytes,
            path = %target.display(),
            "Cached blob"
        );

        Ok(size_bytes)
    }

    async fn contains(&self, digest: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(digest))
            .await
            .unwrap_or(false))
    }

    async fn remove(&self, digest: &str) -> Result<()> {
        self.invalidate(digest).await
    }
}

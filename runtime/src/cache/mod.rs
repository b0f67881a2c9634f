//! Content-addressed blob caches.
//!
//! Provides two implementations of [`BlobCache`]:
//! - `InMemoryBlobCache`: concurrent map, for tests and small transfers
//! - `DiskBlobCache`: one file per digest with LRU pruning
//!
//! Content is immutable once stored under its digest, so two concurrent
//! writers of the same digest may both succeed.

pub mod disk;
pub mod memory;

pub use disk::{BlobMeta, DiskBlobCache};
pub use memory::{CacheStats, InMemoryBlobCache};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use transport_core::error::Result;

/// Readable handle to cached content.
pub type CacheReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content cache keyed by digest (e.g. "sha256:abc123...").
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Open the content stored under `digest`, or `None` on a miss.
    async fn get(&self, digest: &str) -> Result<Option<CacheReader>>;

    /// Store `content` under `digest`. Returns the number of bytes stored.
    ///
    /// The cache does not verify the digest; callers that need integrity
    /// hash the content while it streams.
    async fn put(&self, digest: &str, content: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64>;

    /// Whether content is stored under `digest`.
    async fn contains(&self, digest: &str) -> Result<bool>;

    /// Drop the entry for `digest`. Missing entries are not an error.
    async fn remove(&self, digest: &str) -> Result<()>;
}

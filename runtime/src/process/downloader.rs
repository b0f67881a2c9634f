//! OCI image downloader stage.
//!
//! Pulls the image a resource points at and forwards the message with the
//! serialized artifact as its blob. Whatever blob came in is discarded.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use transport_core::error::Result;

use super::message::{read_message, write_message};
use super::uploader::OciImageUploader;
use super::{ProcessContext, ResourceStreamProcessor};
use crate::cache::BlobCache;
use crate::oci::registry::RegistryClient;
use crate::serialize::serialize_artifact;

pub struct OciImageDownloader {
    registry: Arc<dyn RegistryClient>,
    cache: Arc<dyn BlobCache>,
}

impl OciImageDownloader {
    pub fn new(registry: Arc<dyn RegistryClient>, cache: Arc<dyn BlobCache>) -> Self {
        Self { registry, cache }
    }
}

#[async_trait]
impl ResourceStreamProcessor for OciImageDownloader {
    async fn process(
        &self,
        ctx: &ProcessContext,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let (component, resource, mut blob) = read_message(input).await?;
        let source = OciImageUploader::source_reference(&resource)?;

        let discarded = blob.drain().await?;
        drop(blob);
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarded incoming blob");
        }

        tracing::info!(
            stage = %ctx.stage(),
            resource = %resource.identity(),
            source = %source,
            "Downloading image"
        );
        let cache = self.cache.as_ref();
        let artifact = ctx.run(self.registry.pull_artifact(&source, cache)).await?;
        tracing::debug!(
            manifest = %artifact.manifest_digest(),
            bytes = artifact.content_size(),
            "Pulled image"
        );
        let serialized = ctx.run(serialize_artifact(&artifact, cache)).await?;

        write_message(output, &component, &resource, serialized).await?;
        Ok(())
    }
}

//! OCI image uploader stage.
//!
//! Pushes the artifact carried in the blob to a target registry and
//! forwards the message with the resource's access pointing at the target.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use transport_core::descriptor::{OciRegistryAccess, Resource};
use transport_core::error::{Result, TransportError};

use super::message::{read_message, write_message};
use super::{ProcessContext, ResourceStreamProcessor};
use crate::cache::BlobCache;
use crate::oci::reference::{target_reference, ImageReference};
use crate::oci::registry::RegistryClient;
use crate::serialize::{deserialize_artifact, serialize_artifact};

/// Uploader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciImageUploaderSpec {
    /// Target registry host, optionally with scheme and path prefix.
    pub base_url: String,
    /// Keep the full source repository path below the base URL.
    #[serde(default)]
    pub keep_source_repo: bool,
}

pub struct OciImageUploader {
    spec: OciImageUploaderSpec,
    registry: Arc<dyn RegistryClient>,
    cache: Arc<dyn BlobCache>,
}

impl OciImageUploader {
    pub fn new(
        spec: OciImageUploaderSpec,
        registry: Arc<dyn RegistryClient>,
        cache: Arc<dyn BlobCache>,
    ) -> Self {
        Self {
            spec,
            registry,
            cache,
        }
    }

    /// Source reference of an `ociImage` resource in an `ociRegistry`.
    pub(crate) fn source_reference(resource: &Resource) -> Result<ImageReference> {
        if !resource.is_oci_image_in_registry() {
            return Err(TransportError::UnsupportedResource {
                resource_type: resource.resource_type.clone(),
                access_type: resource.access.access_type.clone(),
            });
        }
        let access: OciRegistryAccess = resource.access.decode()?;
        ImageReference::parse(&access.image_reference)
    }
}

#[async_trait]
impl ResourceStreamProcessor for OciImageUploader {
    async fn process(
        &self,
        ctx: &ProcessContext,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let (component, mut resource, mut blob) = read_message(input).await?;

        let source = Self::source_reference(&resource)?;
        let target = target_reference(&self.spec.base_url, &source, self.spec.keep_source_repo)?;
        tracing::info!(
            stage = %ctx.stage(),
            resource = %resource.identity(),
            source = %source,
            target = %target,
            "Uploading image"
        );

        let cache = self.cache.as_ref();
        let artifact = ctx.run(deserialize_artifact(&mut blob, cache)).await?;
        blob.drain().await?;
        drop(blob);

        ctx.run(self.registry.push_artifact(&target, &artifact, cache))
            .await?;
        tracing::debug!(
            target = %target,
            manifest = %artifact.manifest_digest(),
            bytes = artifact.content_size(),
            "Pushed image"
        );

        let serialized = ctx.run(serialize_artifact(&artifact, cache)).await?;
        resource.access = OciRegistryAccess {
            image_reference: target.to_string(),
        }
        .into();

        write_message(output, &component, &resource, serialized).await?;
        Ok(())
    }
}

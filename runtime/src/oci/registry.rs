//! Registry client used by the OCI stages.
//!
//! [`OciDistributionClient`] talks to real registries through the
//! `oci-distribution` crate. Blob content always flows through a
//! [`BlobCache`], so a push never re-fetches what a pull already stored.

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer, PushResponse};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use tokio::io::AsyncReadExt;
use transport_core::error::{Result, TransportError};

use super::artifact::{sha256_digest_reader, ImageManifest, OciArtifact};
use super::reference::ImageReference;
use crate::cache::BlobCache;
use crate::process::message::SpooledBlob;

/// Push/pull access to an OCI registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the artifact at `reference`, storing config and layers in `cache`.
    async fn pull_artifact(
        &self,
        reference: &ImageReference,
        cache: &dyn BlobCache,
    ) -> Result<OciArtifact>;

    /// Push `artifact` to `reference`, reading its blobs from `cache`.
    async fn push_artifact(
        &self,
        reference: &ImageReference,
        artifact: &OciArtifact,
        cache: &dyn BlobCache,
    ) -> Result<()>;
}

/// Anonymous HTTPS client over `oci-distribution`.
pub struct OciDistributionClient {
    client: Client,
}

impl OciDistributionClient {
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    fn registry_error(reference: &ImageReference, message: String) -> TransportError {
        TransportError::RegistryError {
            registry: reference.registry.clone(),
            message,
        }
    }

    async fn pull_into_cache(
        &self,
        oci_ref: &Reference,
        reference: &ImageReference,
        descriptor: &OciDescriptor,
        cache: &dyn BlobCache,
    ) -> Result<()> {
        if cache.contains(&descriptor.digest).await? {
            tracing::debug!(digest = %descriptor.digest, "Blob already cached, skipping pull");
            return Ok(());
        }

        tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Pulling blob");
        let mut spool = SpooledBlob::empty()?;
        self.client
            .pull_blob(oci_ref, descriptor, spool.writer())
            .await
            .map_err(|e| {
                Self::registry_error(
                    reference,
                    format!("Failed to pull blob {}: {}", descriptor.digest, e),
                )
            })?;
        spool.finish().await?;

        store_verified(cache, &descriptor.digest, spool).await?;
        Ok(())
    }
}

impl Default for OciDistributionClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash `spool` and store it under `digest` only if it matches.
async fn store_verified(cache: &dyn BlobCache, digest: &str, mut spool: SpooledBlob) -> Result<u64> {
    if digest.starts_with("sha256:") {
        let actual = sha256_digest_reader(&mut spool).await?;
        if actual != digest {
            return Err(TransportError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }
        spool.rewind().await?;
    }
    cache.put(digest, &mut spool).await
}

async fn read_cached(cache: &dyn BlobCache, digest: &str) -> Result<Vec<u8>> {
    let mut reader = cache
        .get(digest)
        .await?
        .ok_or_else(|| TransportError::CacheRead(format!("blob {} is not cached", digest)))?;
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .await
        .map_err(|e| TransportError::CacheRead(format!("Failed to read blob {}: {}", digest, e)))?;
    Ok(data)
}

#[async_trait]
impl RegistryClient for OciDistributionClient {
    async fn pull_artifact(
        &self,
        reference: &ImageReference,
        cache: &dyn BlobCache,
    ) -> Result<OciArtifact> {
        let oci_ref = to_oci_reference(reference)?;
        tracing::info!(reference = %reference, "Pulling artifact from registry");

        let (oci_manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &RegistryAuth::Anonymous)
            .await
            .map_err(|e| Self::registry_error(reference, format!("Failed to pull manifest: {}", e)))?;

        self.pull_into_cache(&oci_ref, reference, &oci_manifest.config, cache)
            .await?;
        for layer in &oci_manifest.layers {
            self.pull_into_cache(&oci_ref, reference, layer, cache).await?;
        }

        let manifest = from_oci_manifest(oci_manifest)?;
        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            layers = manifest.layers.len(),
            "Artifact pulled"
        );
        Ok(OciArtifact::new(manifest))
    }

    async fn push_artifact(
        &self,
        reference: &ImageReference,
        artifact: &OciArtifact,
        cache: &dyn BlobCache,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let manifest = artifact.manifest();
        tracing::info!(reference = %reference, "Pushing artifact to registry");

        let config = Config::new(
            read_cached(cache, &manifest.config.digest).await?,
            manifest.config.media_type.clone(),
            None,
        );

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            let data = read_cached(cache, &descriptor.digest).await?;
            tracing::debug!(digest = %descriptor.digest, size = data.len(), "Read layer for push");
            layers.push(ImageLayer::new(data, descriptor.media_type.clone(), None));
        }

        let response: PushResponse = self
            .client
            .push(
                &oci_ref,
                &layers,
                config,
                &RegistryAuth::Anonymous,
                Some(to_oci_manifest(manifest)?),
            )
            .await
            .map_err(|e| Self::registry_error(reference, format!("Failed to push artifact: {}", e)))?;

        tracing::info!(
            reference = %reference,
            manifest_url = %response.manifest_url,
            "Artifact pushed"
        );
        Ok(())
    }
}

fn to_oci_manifest(manifest: &ImageManifest) -> Result<OciImageManifest> {
    Ok(serde_json::from_value(serde_json::to_value(manifest)?)?)
}

fn from_oci_manifest(manifest: OciImageManifest) -> Result<ImageManifest> {
    Ok(serde_json::from_value(serde_json::to_value(manifest)?)?)
}

/// Convert an [`ImageReference`] to an oci-distribution [`Reference`].
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        TransportError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Platform resolver that selects linux images matching the host architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}

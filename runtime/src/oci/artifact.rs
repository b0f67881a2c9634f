//! Structured OCI artifact: an image manifest plus the blobs it references.
//!
//! Blob content is never held here; it lives in a [`BlobCache`](crate::cache::BlobCache)
//! keyed by digest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Media type of an OCI image manifest.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of a Docker v2 image manifest.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Content descriptor (OCI image spec).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Descriptor for `data`, with a sha256 digest computed over it.
    pub fn for_content(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(data),
            size: data.len() as i64,
            urls: None,
            annotations: None,
        }
    }
}

/// OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            config,
            layers,
            annotations: None,
        }
    }

    /// Config descriptor followed by layer descriptors.
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }

    /// Whether `digest` is the config or one of the layers.
    pub fn references(&self, digest: &str) -> bool {
        self.blobs().any(|d| d.digest == digest)
    }
}

/// A registry artifact as understood by the registry client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciArtifact {
    manifest: ImageManifest,
}

impl OciArtifact {
    pub fn new(manifest: ImageManifest) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    /// Digest of the canonical JSON encoding of the manifest.
    pub fn manifest_digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.manifest).unwrap_or_default();
        sha256_digest(&bytes)
    }

    /// Sum of config and layer sizes.
    pub fn content_size(&self) -> u64 {
        self.manifest
            .blobs()
            .map(|d| d.size.max(0) as u64)
            .sum()
    }
}

/// `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// `sha256:<hex>` digest of everything `reader` yields, read in chunks.
pub async fn sha256_digest_reader<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

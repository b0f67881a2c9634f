//! OCI artifact envelope.
//!
//! ```text
//! [0x10][len][{"mediaType": ARTIFACT_MEDIA_TYPE, "manifest": {...}}]
//! for each config/layer blob:
//!   [0x11][len][descriptor JSON]
//!   [0x12][len][bytes] ... [0x13][0]
//! [0x14][0]
//! ```
//!
//! Blob sections may be omitted for digests the reader already has cached.

use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use transport_core::error::{Result, TransportError};

use crate::cache::BlobCache;
use crate::frame::{self, ChunkedReader};
use crate::oci::artifact::{Descriptor, ImageManifest, OciArtifact};
use crate::process::message::{map_read_error, SpooledBlob, MAX_METADATA_PAYLOAD};

/// Envelope media type of a serialized OCI artifact.
pub const ARTIFACT_MEDIA_TYPE: &str = "application/vnd.component-transport.oci-artifact.v1";

/// Frame type: envelope header with the manifest.
pub const FRAME_ARTIFACT_HEADER: u8 = 0x10;
/// Frame type: descriptor of the blob that follows.
pub const FRAME_BLOB_HEADER: u8 = 0x11;
/// Frame type: blob data chunk.
pub const FRAME_BLOB_DATA: u8 = 0x12;
/// Frame type: end of blob.
pub const FRAME_BLOB_END: u8 = 0x13;
/// Frame type: end of envelope.
pub const FRAME_ARTIFACT_END: u8 = 0x14;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactHeader {
    media_type: String,
    manifest: ImageManifest,
}

/// Reader that hashes what passes through and remembers upstream failures,
/// so they are not misreported as cache errors.
struct SectionReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
    failure: Option<(io::ErrorKind, String)>,
}

impl<R> SectionReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
            failure: None,
        }
    }

    fn digest(&self) -> String {
        format!("sha256:{}", hex::encode(self.hasher.clone().finalize()))
    }

    fn take_failure(&mut self) -> Option<io::Error> {
        self.failure
            .take()
            .map(|(kind, message)| io::Error::new(kind, message))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SectionReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match ready!(Pin::new(&mut this.inner).poll_read(cx, buf)) {
            Ok(()) => {
                let fresh = &buf.filled()[before..];
                this.hasher.update(fresh);
                this.bytes += fresh.len() as u64;
                Poll::Ready(Ok(()))
            }
            Err(e) => {
                this.failure = Some((e.kind(), e.to_string()));
                Poll::Ready(Err(e))
            }
        }
    }
}

fn verify_digest(expected: &str, actual: &str) -> Result<()> {
    if !expected.starts_with("sha256:") {
        tracing::warn!(digest = %expected, "Skipping verification of non-sha256 digest");
        return Ok(());
    }
    if expected != actual {
        return Err(TransportError::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn unsupported(message: impl Into<String>) -> TransportError {
    TransportError::UnsupportedArtifactEncoding(message.into())
}

/// Decode an artifact envelope from `blob`.
///
/// Embedded blobs are verified against their digest and stored in `cache`;
/// blobs the cache already holds are skipped over. Every blob the manifest
/// references must end up in the cache.
pub async fn deserialize_artifact<R>(blob: &mut R, cache: &dyn BlobCache) -> Result<OciArtifact>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let (frame_type, payload) = match frame::read_frame(blob, MAX_METADATA_PAYLOAD).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(unsupported("blob is empty")),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(map_read_error(e, "artifact header"))
        }
        Err(e) => return Err(unsupported(format!("unrecognized envelope: {}", e))),
    };
    if frame_type != FRAME_ARTIFACT_HEADER {
        return Err(unsupported(format!(
            "unrecognized envelope frame 0x{:02x}",
            frame_type
        )));
    }

    let header: ArtifactHeader = serde_json::from_slice(&payload)
        .map_err(|e| unsupported(format!("invalid artifact header: {}", e)))?;
    if header.media_type != ARTIFACT_MEDIA_TYPE {
        return Err(unsupported(format!(
            "unknown envelope media type '{}'",
            header.media_type
        )));
    }
    let manifest = header.manifest;

    let mut embedded = HashSet::new();
    loop {
        let (frame_type, payload) = frame::read_frame(blob, MAX_METADATA_PAYLOAD)
            .await
            .map_err(|e| map_read_error(e, "artifact envelope"))?
            .ok_or_else(|| {
                TransportError::TruncatedMessage("artifact envelope has no end marker".to_string())
            })?;

        match frame_type {
            FRAME_ARTIFACT_END => break,
            FRAME_BLOB_HEADER => {
                let descriptor: Descriptor = serde_json::from_slice(&payload)
                    .map_err(|e| unsupported(format!("invalid blob descriptor: {}", e)))?;
                if !manifest.references(&descriptor.digest) {
                    return Err(unsupported(format!(
                        "blob {} is not referenced by the manifest",
                        descriptor.digest
                    )));
                }
                read_blob_section(blob, &descriptor, cache).await?;
                embedded.insert(descriptor.digest);
            }
            other => {
                return Err(unsupported(format!(
                    "unexpected frame 0x{:02x} in artifact envelope",
                    other
                )))
            }
        }
    }

    for descriptor in manifest.blobs() {
        if embedded.contains(&descriptor.digest) {
            continue;
        }
        if !cache.contains(&descriptor.digest).await? {
            return Err(TransportError::CacheRead(format!(
                "blob {} is neither embedded nor cached",
                descriptor.digest
            )));
        }
    }

    Ok(OciArtifact::new(manifest))
}

async fn read_blob_section<R>(blob: &mut R, descriptor: &Descriptor, cache: &dyn BlobCache) -> Result<()>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut section = ChunkedReader::new(blob, FRAME_BLOB_DATA, FRAME_BLOB_END);

    if cache.contains(&descriptor.digest).await? {
        let skipped = section
            .drain()
            .await
            .map_err(|e| map_read_error(e, "artifact blob"))?;
        tracing::debug!(digest = %descriptor.digest, bytes = skipped, "Blob already cached");
        return Ok(());
    }

    // Content is published only after it hashes to its digest.
    let mut reader = SectionReader::new(section);
    let mut spool = SpooledBlob::empty()?;
    let copied = tokio::io::copy(&mut reader, spool.writer()).await;
    if let Some(failure) = reader.take_failure() {
        return Err(map_read_error(failure, "artifact blob"));
    }
    copied?;
    spool.finish().await?;
    verify_digest(&descriptor.digest, &reader.digest())?;

    if cache.contains(&descriptor.digest).await? {
        tracing::debug!(digest = %descriptor.digest, "Blob stored concurrently, keeping cached copy");
        return Ok(());
    }
    cache.put(&descriptor.digest, &mut spool).await?;

    tracing::debug!(
        digest = %descriptor.digest,
        bytes = reader.bytes,
        "Stored blob from artifact stream"
    );
    Ok(())
}

/// Encode `artifact` into `w`, resolving every blob from `cache`.
pub async fn write_artifact<W>(artifact: &OciArtifact, cache: &dyn BlobCache, w: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = ArtifactHeader {
        media_type: ARTIFACT_MEDIA_TYPE.to_string(),
        manifest: artifact.manifest().clone(),
    };
    frame::write_frame(w, FRAME_ARTIFACT_HEADER, &serde_json::to_vec(&header)?).await?;

    let mut written = HashSet::new();
    for descriptor in artifact.manifest().blobs() {
        if !written.insert(descriptor.digest.as_str()) {
            continue;
        }

        let content = cache.get(&descriptor.digest).await?.ok_or_else(|| {
            TransportError::CacheRead(format!("blob {} is not cached", descriptor.digest))
        })?;

        frame::write_frame(w, FRAME_BLOB_HEADER, &serde_json::to_vec(descriptor)?).await?;
        let mut reader = SectionReader::new(content);
        let copied = frame::write_chunked(w, FRAME_BLOB_DATA, FRAME_BLOB_END, &mut reader).await;
        if let Some(failure) = reader.take_failure() {
            return Err(TransportError::CacheRead(format!(
                "Failed to read cached blob {}: {}",
                descriptor.digest, failure
            )));
        }
        copied?;
        verify_digest(&descriptor.digest, &reader.digest())?;
    }

    frame::write_frame(w, FRAME_ARTIFACT_END, &[]).await?;
    w.flush().await?;
    Ok(())
}

/// Encode `artifact` into a fresh spooled blob, rewound and ready to read.
pub async fn serialize_artifact(artifact: &OciArtifact, cache: &dyn BlobCache) -> Result<SpooledBlob> {
    let mut spool = SpooledBlob::empty()?;
    write_artifact(artifact, cache, spool.writer()).await?;
    spool.finish().await?;
    Ok(spool)
}

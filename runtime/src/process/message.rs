//! Processor message framing.
//!
//! A processor message carries one resource between stages:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ "CTPM" [version: u8]                                 │
//! │ [0x01][len][component descriptor JSON]               │
//! │ [0x02][len][resource JSON]                           │
//! │ [0x03][len][blob bytes]  ... repeated                │
//! │ [0x04][0]                (end of blob)               │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The blob section is read incrementally through [`BlobReader`], which
//! borrows the input stream; dropping it releases the stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use transport_core::descriptor::{ComponentDescriptor, Resource};
use transport_core::error::{Result, TransportError};

use crate::frame::{self, ChunkedReader};

/// Message preamble magic.
pub const MESSAGE_MAGIC: &[u8; 4] = b"CTPM";

/// Current message format version.
pub const MESSAGE_VERSION: u8 = 1;

/// Frame type: component descriptor section.
pub const FRAME_COMPONENT: u8 = 0x01;
/// Frame type: resource descriptor section.
pub const FRAME_RESOURCE: u8 = 0x02;
/// Frame type: blob data chunk.
pub const FRAME_BLOB_DATA: u8 = 0x03;
/// Frame type: end of blob.
pub const FRAME_BLOB_END: u8 = 0x04;

/// Maximum size of a metadata section: 16 MiB.
pub const MAX_METADATA_PAYLOAD: usize = 16 * 1024 * 1024;

/// Incremental reader over the blob section of a processor message.
pub struct BlobReader<'a, R: ?Sized> {
    inner: ChunkedReader<'a, R>,
}

impl<'a, R> BlobReader<'a, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner: ChunkedReader::new(inner, FRAME_BLOB_DATA, FRAME_BLOB_END),
        }
    }

    /// Blob bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read()
    }

    /// Read and discard the rest of the blob.
    pub async fn drain(&mut self) -> Result<u64> {
        self.inner
            .drain()
            .await
            .map_err(|e| map_read_error(e, "blob"))
    }
}

impl<R> AsyncRead for BlobReader<'_, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

/// Map an I/O error raised while reading `section` to the protocol taxonomy.
pub fn map_read_error(err: io::Error, section: &str) -> TransportError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            TransportError::TruncatedMessage(format!("stream ended inside {}: {}", section, err))
        }
        io::ErrorKind::InvalidData => {
            TransportError::MalformedHeader(format!("invalid {}: {}", section, err))
        }
        _ => TransportError::Io(err),
    }
}

async fn read_preamble<R>(r: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut preamble = [0u8; 5];
    r.read_exact(&mut preamble)
        .await
        .map_err(|e| map_read_error(e, "message preamble"))?;

    if &preamble[..4] != MESSAGE_MAGIC {
        return Err(TransportError::MalformedHeader(
            "missing processor message magic".to_string(),
        ));
    }
    if preamble[4] != MESSAGE_VERSION {
        return Err(TransportError::MalformedHeader(format!(
            "unsupported processor message version {}",
            preamble[4]
        )));
    }
    Ok(())
}

async fn read_section<R, T>(r: &mut R, expected: u8, section: &str) -> Result<T>
where
    R: AsyncRead + Unpin + ?Sized,
    T: serde::de::DeserializeOwned,
{
    let (frame_type, payload) = frame::read_frame(r, MAX_METADATA_PAYLOAD)
        .await
        .map_err(|e| map_read_error(e, section))?
        .ok_or_else(|| {
            TransportError::TruncatedMessage(format!("stream ended before {}", section))
        })?;

    if frame_type != expected {
        return Err(TransportError::MalformedHeader(format!(
            "expected {} frame 0x{:02x}, got 0x{:02x}",
            section, expected, frame_type
        )));
    }

    serde_json::from_slice(&payload)
        .map_err(|e| TransportError::MalformedHeader(format!("invalid {}: {}", section, e)))
}

/// Read the metadata sections of a message, leaving the stream at the blob.
pub async fn read_message_header<R>(r: &mut R) -> Result<(ComponentDescriptor, Resource)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_preamble(r).await?;
    let component = read_section(r, FRAME_COMPONENT, "component descriptor").await?;
    let resource = read_section(r, FRAME_RESOURCE, "resource descriptor").await?;
    Ok((component, resource))
}

/// Read a processor message.
///
/// The returned [`BlobReader`] borrows `r` and streams the blob section;
/// the caller owns it and releases it by dropping it.
pub async fn read_message<R>(r: &mut R) -> Result<(ComponentDescriptor, Resource, BlobReader<'_, R>)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let (component, resource) = read_message_header(r).await?;
    Ok((component, resource, BlobReader::new(r)))
}

/// Write a processor message, consuming `blob` to its end.
///
/// Returns the number of blob bytes written. `blob` is dropped before
/// returning on every path.
pub async fn write_message<W, B>(
    w: &mut W,
    component: &ComponentDescriptor,
    resource: &Resource,
    mut blob: B,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + Unpin,
{
    let component_json = serde_json::to_vec(component)?;
    let resource_json = serde_json::to_vec(resource)?;

    w.write_all(MESSAGE_MAGIC).await?;
    w.write_all(&[MESSAGE_VERSION]).await?;
    frame::write_frame(w, FRAME_COMPONENT, &component_json).await?;
    frame::write_frame(w, FRAME_RESOURCE, &resource_json).await?;

    let written = frame::write_chunked(w, FRAME_BLOB_DATA, FRAME_BLOB_END, &mut blob)
        .await
        .map_err(|e| map_read_error(e, "source blob"))?;
    w.flush().await?;

    tracing::trace!(
        component = %component.name(),
        resource = %resource.identity(),
        blob_bytes = written,
        "Wrote processor message"
    );

    Ok(written)
}

/// Anonymous temp file holding a copy of a blob, rewound to the start.
///
/// Gives seekable access to blob content without holding it in memory; the
/// file is deleted by the OS once the handle is dropped.
pub struct SpooledBlob {
    file: tokio::fs::File,
    len: u64,
}

impl SpooledBlob {
    /// Create an empty spool file.
    pub fn empty() -> Result<Self> {
        let file = tempfile::tempfile()?;
        Ok(Self {
            file: tokio::fs::File::from_std(file),
            len: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writable handle for filling the spool; call [`SpooledBlob::finish`] afterwards.
    pub fn writer(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }

    /// Flush, record the length and rewind.
    pub async fn finish(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.len = self.file.seek(io::SeekFrom::End(0)).await?;
        self.rewind().await
    }

    /// Seek back to the start.
    pub async fn rewind(&mut self) -> Result<()> {
        self.file.seek(io::SeekFrom::Start(0)).await?;
        Ok(())
    }
}

impl AsyncRead for SpooledBlob {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

/// Copy a blob stream into a [`SpooledBlob`].
pub async fn spool_blob<B>(mut blob: B) -> Result<SpooledBlob>
where
    B: AsyncRead + Unpin,
{
    let mut spool = SpooledBlob::empty()?;
    tokio::io::copy(&mut blob, spool.writer())
        .await
        .map_err(|e| map_read_error(e, "blob"))?;
    spool.finish().await?;
    Ok(spool)
}

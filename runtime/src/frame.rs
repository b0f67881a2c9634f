//! Binary framing shared by processor messages and the artifact codec.
//!
//! Wire format: `[type: u8] [length: u32 BE] [payload: length bytes]`
//!
//! Unbounded byte sections (blobs) are written as a run of data frames
//! terminated by a zero-length end frame, so neither side needs to know the
//! total length up front.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Frame header size: type byte plus big-endian length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Maximum payload of a single data chunk frame: 1 MiB.
pub const MAX_CHUNK_PAYLOAD: usize = 1024 * 1024;

/// Chunk size used when writing byte sections.
pub const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Write one frame.
pub async fn write_frame<W>(w: &mut W, frame_type: u8, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame payload too large: {} bytes", payload.len()),
        )
    })?;
    w.write_all(&[frame_type]).await?;
    w.write_all(&len.to_be_bytes()).await?;
    if !payload.is_empty() {
        w.write_all(payload).await?;
    }
    Ok(())
}

/// Read a frame header. Returns `(frame_type, length)`.
///
/// Returns `Ok(None)` on EOF at a frame boundary; EOF inside the header is
/// an `UnexpectedEof` error.
pub async fn read_frame_header<R>(r: &mut R) -> io::Result<Option<(u8, usize)>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let n = r.read(&mut header[..1]).await?;
    if n == 0 {
        return Ok(None);
    }
    r.read_exact(&mut header[1..]).await?;

    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    Ok(Some((header[0], len)))
}

/// Read a complete frame whose payload must not exceed `max_payload`.
pub async fn read_frame<R>(r: &mut R, max_payload: usize) -> io::Result<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let Some((frame_type, len)) = read_frame_header(r).await? else {
        return Ok(None);
    };

    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame 0x{:02x} too large: {} bytes (max {})",
                frame_type, len, max_payload
            ),
        ));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        r.read_exact(&mut payload).await?;
    }
    Ok(Some((frame_type, payload)))
}

/// Copy `src` to `w` as data frames followed by an end frame.
///
/// Returns the number of content bytes written.
pub async fn write_chunked<W, R>(
    w: &mut W,
    data_type: u8,
    end_type: u8,
    src: &mut R,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; WRITE_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        write_frame(w, data_type, &buf[..n]).await?;
        total += n as u64;
    }
    write_frame(w, end_type, &[]).await?;
    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Header,
    Data { remaining: usize },
    Done,
}

/// Incremental reader over a chunked byte section.
///
/// Borrows the underlying stream; once the end frame is consumed the stream
/// is positioned right after the section.
pub struct ChunkedReader<'a, R: ?Sized> {
    inner: &'a mut R,
    data_type: u8,
    end_type: u8,
    state: ChunkState,
    header: [u8; FRAME_HEADER_LEN],
    header_filled: usize,
    bytes_read: u64,
}

impl<'a, R> ChunkedReader<'a, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    pub fn new(inner: &'a mut R, data_type: u8, end_type: u8) -> Self {
        Self {
            inner,
            data_type,
            end_type,
            state: ChunkState::Header,
            header: [0u8; FRAME_HEADER_LEN],
            header_filled: 0,
            bytes_read: 0,
        }
    }

    /// Content bytes handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether the end frame has been consumed.
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Read and discard the rest of the section. Returns the discarded byte count.
    pub async fn drain(&mut self) -> io::Result<u64> {
        let mut sink = tokio::io::sink();
        tokio::io::copy(self, &mut sink).await
    }
}

fn eof_in_section() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "stream ended inside a chunked section",
    )
}

impl<R> AsyncRead for ChunkedReader<'_, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match this.state {
                ChunkState::Done => return Poll::Ready(Ok(())),
                ChunkState::Header => {
                    while this.header_filled < FRAME_HEADER_LEN {
                        let mut hb = ReadBuf::new(&mut this.header[this.header_filled..]);
                        ready!(Pin::new(&mut *this.inner).poll_read(cx, &mut hb))?;
                        let n = hb.filled().len();
                        if n == 0 {
                            return Poll::Ready(Err(eof_in_section()));
                        }
                        this.header_filled += n;
                    }
                    this.header_filled = 0;

                    let frame_type = this.header[0];
                    let len = u32::from_be_bytes([
                        this.header[1],
                        this.header[2],
                        this.header[3],
                        this.header[4],
                    ]) as usize;

                    if frame_type == this.end_type {
                        if len != 0 {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("end frame 0x{:02x} carries {} bytes", frame_type, len),
                            )));
                        }
                        this.state = ChunkState::Done;
                        continue;
                    }
                    if frame_type != this.data_type {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "unexpected frame 0x{:02x} in chunked section (want 0x{:02x} or 0x{:02x})",
                                frame_type, this.data_type, this.end_type
                            ),
                        )));
                    }
                    if len > MAX_CHUNK_PAYLOAD {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("chunk too large: {} bytes (max {})", len, MAX_CHUNK_PAYLOAD),
                        )));
                    }
                    this.state = ChunkState::Data { remaining: len };
                }
                ChunkState::Data { remaining: 0 } => this.state = ChunkState::Header,
                ChunkState::Data { remaining } => {
                    if buf.remaining() == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let want = remaining.min(buf.remaining());
                    let dst = buf.initialize_unfilled_to(want);
                    let mut rb = ReadBuf::new(dst);
                    ready!(Pin::new(&mut *this.inner).poll_read(cx, &mut rb))?;
                    let n = rb.filled().len();
                    if n == 0 {
                        return Poll::Ready(Err(eof_in_section()));
                    }
                    buf.advance(n);
                    this.bytes_read += n as u64;
                    this.state = ChunkState::Data {
                        remaining: remaining - n,
                    };
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

//! Length-prefixed framing over any byte stream.
//!
//! Wire format: a 4-byte big-endian unsigned length `N`, then exactly `N`
//! payload bytes.  The codec is payload-agnostic; callers decide what the
//! bytes contain.
//!
//! # Limits
//! - A declared length of zero is a protocol error.
//! - Frames above [`MAX_FRAME_BYTES`] are rejected before any payload read.
//! - Short reads are retried until the payload is complete; end-of-stream
//!   mid-frame is fatal.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard upper bound on a single frame's payload: 10 MiB.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame I/O: {0}")]
    Io(#[from] io::Error),
    #[error("zero-length frame")]
    Empty,
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES}-byte limit")]
    TooLarge(usize),
}

impl FrameError {
    /// True when the error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Io(err) if is_disconnect(err))
    }
}

/// Classify an I/O error as a disconnect.
///
/// No single error value covers every platform and wrapper, so the predicate
/// checks the kind first and falls back to a textual match.  Retry policy and
/// HTTP status mapping both go through here so they cannot drift apart.
pub fn is_disconnect(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset => true,
        _ => {
            let text = err.to_string().to_lowercase();
            text.contains("broken pipe") || text.contains("pipe closed") || text.contains("reset")
        }
    }
}

/// Write one frame: length header then payload, then flush.
pub async fn write_frame<W>(sink: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }
    if payload.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let len =
        u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;
    sink.write_all(&len.to_be_bytes()).await?;
    sink.write_all(payload).await?;
    sink.flush().await?;
    Ok(())
}

/// Read one complete frame, validating the declared length first.
pub async fn read_frame<R>(source: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    source.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(FrameError::Empty);
    }
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    source.read_exact(&mut payload).await?;
    Ok(payload)
}

//! Streaming frame reader for the read half of a session.
//!
//! TCP is a *stream* protocol: one `read()` may return part of a frame, or
//! several frames at once.  [`FrameReader`] accumulates bytes in a buffer and
//! calls [`decode_frame`] until it reports `InsufficientData`, at which point
//! it reads more from the socket.

use commhub_core::{decode_frame, Frame, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::session::SessionError;

const READ_CHUNK: usize = 8 * 1024;

/// Reads complete [`Frame`]s from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    recv_buf: Vec<u8>,
    read_tmp: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            recv_buf: Vec::with_capacity(READ_CHUNK),
            read_tmp: vec![0u8; READ_CHUNK],
        }
    }

    /// Returns the next frame, or `Ok(None)` on a clean end of stream.
    ///
    /// Cancel-safe: bytes already read stay buffered if the future is
    /// dropped, so this can sit in a `select!` arm.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Protocol`] for a malformed frame and
    /// [`SessionError::Io`] for socket errors, including a stream that ends
    /// in the middle of a frame.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, SessionError> {
        loop {
            if !self.recv_buf.is_empty() {
                match decode_frame(&self.recv_buf) {
                    Ok((frame, consumed)) => {
                        self.recv_buf.drain(..consumed);
                        return Ok(Some(frame));
                    }
                    Err(ProtocolError::InsufficientData { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let n = self.inner.read(&mut self.read_tmp).await?;
            if n == 0 {
                if self.recv_buf.is_empty() {
                    return Ok(None);
                }
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {} bytes of a partial frame", self.recv_buf.len()),
                )));
            }
            self.recv_buf.extend_from_slice(&self.read_tmp[..n]);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

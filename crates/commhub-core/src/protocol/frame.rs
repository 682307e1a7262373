//! Binary codec for the outer frame carried on every commhub connection.
//!
//! Wire format:
//! ```text
//! [version:1][kind:1][reserved:2][payload_len:4][payload:N]
//! ```
//! Total header size: 8 bytes. `payload_len` is big-endian.
//!
//! # Why an explicit frame layer?
//!
//! A single TCP stream carries two very different things: short UTF-8
//! control messages for the subscribed modules, and raw file bytes from the
//! bulk-transfer sub-protocol.  Writing both as bare bytes (or bare
//! newline-terminated lines) makes it impossible for the receiver to tell
//! where one ends and the other begins.  The `kind` tag plus explicit length
//! means every byte on the wire belongs to exactly one known frame.

use thiserror::Error;

use crate::domain::session::SessionId;

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload a peer may declare.  Larger declarations are rejected
/// before any allocation happens.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The kind byte in the header is not a recognized value.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// The declared payload length exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload of {declared} bytes exceeds limit of {max}")]
    PayloadTooLarge { declared: usize, max: usize },

    /// The payload could not be parsed (UTF-8 error, non-empty end marker, ...).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The handshake frame did not carry a valid session id.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),
}

/// Frame kind codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// First frame from server to client; carries the assigned session id.
    Handshake = 0x01,
    /// Control-plane text delivered to subscribed modules.
    Data = 0x02,
    /// A segment of the bulk-transfer byte stream.
    Bulk = 0x03,
    /// End of a bulk-transfer batch.
    BulkEnd = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Handshake),
            0x02 => Ok(FrameKind::Data),
            0x03 => Ok(FrameKind::Bulk),
            0x04 => Ok(FrameKind::BulkEnd),
            other => Err(ProtocolError::UnknownFrameKind(other)),
        }
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(SessionId),
    Data(String),
    Bulk(Vec<u8>),
    BulkEnd,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Handshake(_) => FrameKind::Handshake,
            Frame::Data(_) => FrameKind::Data,
            Frame::Bulk(_) => FrameKind::Bulk,
            Frame::BulkEnd => FrameKind::BulkEnd,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Frame::Handshake(id) => id.as_str().as_bytes(),
            Frame::Data(text) => text.as_bytes(),
            Frame::Bulk(bytes) => bytes,
            Frame::BulkEnd => &[],
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub payload_len: usize,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Frame`] into a byte vector including the 8-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD_LEN`].
///
/// # Examples
///
/// ```rust
/// use commhub_core::protocol::{decode_frame, encode_frame, Frame};
///
/// let frame = Frame::Data("hello".to_string());
/// let bytes = encode_frame(&frame).unwrap();
/// let (decoded, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(decoded, frame);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let payload = frame.payload();
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            declared: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(frame.kind() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Parses the fixed-size header at the start of `bytes`.
///
/// Streaming readers call this on exactly [`FRAME_HEADER_SIZE`] bytes, then
/// read `payload_len` more bytes and hand them to [`decode_payload`].
///
/// # Errors
///
/// Returns [`ProtocolError`] for short input, a wrong version, an unknown
/// kind, or an oversized length.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: FRAME_HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let kind = FrameKind::try_from(bytes[1])?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            declared: payload_len,
            max: MAX_PAYLOAD_LEN,
        });
    }

    Ok(FrameHeader { kind, payload_len })
}

/// Builds a [`Frame`] of the given kind from its payload bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] for non-UTF-8 text or a
/// non-empty `BulkEnd`, and [`ProtocolError::MalformedHandshake`] for an
/// invalid session id.
pub fn decode_payload(kind: FrameKind, payload: Vec<u8>) -> Result<Frame, ProtocolError> {
    match kind {
        FrameKind::Handshake => {
            let text = String::from_utf8(payload)
                .map_err(|e| ProtocolError::MalformedHandshake(e.to_string()))?;
            let id = text
                .parse::<SessionId>()
                .map_err(|e| ProtocolError::MalformedHandshake(e.to_string()))?;
            Ok(Frame::Handshake(id))
        }
        FrameKind::Data => String::from_utf8(payload)
            .map(Frame::Data)
            .map_err(|e| ProtocolError::MalformedPayload(format!("data frame is not UTF-8: {e}"))),
        FrameKind::Bulk => Ok(Frame::Bulk(payload)),
        FrameKind::BulkEnd => {
            if payload.is_empty() {
                Ok(Frame::BulkEnd)
            } else {
                Err(ProtocolError::MalformedPayload(format!(
                    "bulk end marker carries {} unexpected bytes",
                    payload.len()
                )))
            }
        }
    }
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the decoded frame and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed or incomplete.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let total_needed = FRAME_HEADER_SIZE + header.payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::InsufficientData {
            needed: total_needed,
            available: bytes.len(),
        });
    }

    let payload = bytes[FRAME_HEADER_SIZE..total_needed].to_vec();
    let frame = decode_payload(header.kind, payload)?;
    Ok((frame, total_needed))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

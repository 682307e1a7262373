//! Bulk-transfer sub-protocol: named, sized byte streams.
//!
//! The sender writes, per file:
//!
//! ```text
//! <fileName>\n
//! <byteLength decimal>\n
//! <byteLength raw bytes>
//! ```
//!
//! and repeats for every file in the batch.  On a commhub connection these
//! bytes travel inside `Bulk` frames, split at arbitrary points, and a
//! `BulkEnd` frame (or the end of the stream) closes the batch.
//!
//! [`BulkDecoder`] is the receiving half.  It is push-based: feed it whatever
//! bytes arrived and it reports what happened as [`BulkEvent`]s.  A single
//! push may contain half a name line, or the tail of one file plus the
//! header of the next; the decoder keeps the partial state between pushes,
//! which is what makes short reads harmless.

use thiserror::Error;
use tracing::trace;

use crate::domain::file_name::sanitize_file_name;

/// Longest name or length line the decoder buffers before giving up.
pub const MAX_LINE_LEN: usize = 4096;

/// Errors that abort a single file transfer.
///
/// None of these tear down the session; the decoder recovers at the next
/// batch boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The batch ended before the declared number of bytes arrived.
    #[error("incomplete transfer of '{file_name}': received {received} of {expected} bytes")]
    Incomplete {
        file_name: String,
        expected: u64,
        received: u64,
    },

    /// The batch ended in the middle of a file header.
    #[error("batch ended inside a file header")]
    TruncatedHeader,

    /// The length line is not a non-negative decimal integer.
    #[error("invalid length line: {0:?}")]
    InvalidLength(String),

    /// A header line exceeded [`MAX_LINE_LEN`] bytes without a newline.
    #[error("header line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// Header announced by the sender before a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkTransferHeader {
    pub file_name: String,
    pub byte_length: u64,
}

impl BulkTransferHeader {
    pub fn new(file_name: impl Into<String>, byte_length: u64) -> Self {
        Self {
            file_name: file_name.into(),
            byte_length,
        }
    }

    /// Encodes the two header lines.
    ///
    /// Line breaks inside the name would desynchronise the receiver, so they
    /// are written as `_`.
    pub fn encode(&self) -> Vec<u8> {
        let name: String = self
            .file_name
            .chars()
            .map(|c| if c == '\n' || c == '\r' { '_' } else { c })
            .collect();
        format!("{name}\n{}\n", self.byte_length).into_bytes()
    }
}

/// Something the decoder observed in the bytes pushed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkEvent {
    /// A complete header was read.  `file_name` is already sanitized.
    FileStarted(BulkTransferHeader),
    /// Bytes belonging to the file most recently started.
    FileData(Vec<u8>),
    /// All declared bytes of the file arrived.
    FileCompleted { file_name: String, byte_length: u64 },
    /// The current transfer was aborted; the decoder discards input until
    /// the end of the batch.
    FileFailed(TransferError),
}

#[derive(Debug)]
enum DecodeState {
    Name,
    Length {
        file_name: String,
    },
    Body {
        file_name: String,
        byte_length: u64,
        received: u64,
    },
    Discarding,
}

/// Push-based decoder for the receiving side of a bulk transfer.
#[derive(Debug)]
pub struct BulkDecoder {
    state: DecodeState,
    line: Vec<u8>,
}

impl Default for BulkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Name,
            line: Vec::new(),
        }
    }

    /// Returns `true` when no file or header is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecodeState::Name) && self.line.is_empty()
    }

    /// Feeds the next chunk of the bulk stream into the decoder.
    pub fn push(&mut self, mut input: &[u8]) -> Vec<BulkEvent> {
        let mut events = Vec::new();

        while !input.is_empty() {
            match &mut self.state {
                DecodeState::Discarding => {
                    trace!(bytes = input.len(), "discarding bulk bytes until batch end");
                    break;
                }
                DecodeState::Body {
                    file_name,
                    byte_length,
                    received,
                } => {
                    let remaining = *byte_length - *received;
                    let take = remaining.min(input.len() as u64) as usize;
                    events.push(BulkEvent::FileData(input[..take].to_vec()));
                    *received += take as u64;
                    input = &input[take..];

                    if *received == *byte_length {
                        events.push(BulkEvent::FileCompleted {
                            file_name: std::mem::take(file_name),
                            byte_length: *byte_length,
                        });
                        self.state = DecodeState::Name;
                    }
                }
                DecodeState::Name | DecodeState::Length { .. } => {
                    let Some(newline) = input.iter().position(|&b| b == b'\n') else {
                        self.line.extend_from_slice(input);
                        if self.line.len() > MAX_LINE_LEN {
                            self.fail(&mut events, TransferError::LineTooLong { limit: MAX_LINE_LEN });
                        }
                        break;
                    };

                    self.line.extend_from_slice(&input[..newline]);
                    input = &input[newline + 1..];
                    if self.line.len() > MAX_LINE_LEN {
                        self.fail(&mut events, TransferError::LineTooLong { limit: MAX_LINE_LEN });
                        break;
                    }

                    let line = std::mem::take(&mut self.line);
                    self.on_line(line, &mut events);
                }
            }
        }

        events
    }

    /// Marks the end of a batch (a `BulkEnd` frame or the end of the stream).
    ///
    /// Returns the error for the file that was cut short, if any, and resets
    /// the decoder so the next batch starts cleanly.
    pub fn end_batch(&mut self) -> Option<TransferError> {
        let line_pending = !self.line.is_empty();
        self.line.clear();
        match std::mem::replace(&mut self.state, DecodeState::Name) {
            DecodeState::Body {
                file_name,
                byte_length,
                received,
            } => Some(TransferError::Incomplete {
                file_name,
                expected: byte_length,
                received,
            }),
            DecodeState::Length { .. } => Some(TransferError::TruncatedHeader),
            DecodeState::Name if line_pending => Some(TransferError::TruncatedHeader),
            DecodeState::Name | DecodeState::Discarding => None,
        }
    }

    fn on_line(&mut self, raw: Vec<u8>, events: &mut Vec<BulkEvent>) {
        let mut text = String::from_utf8_lossy(&raw).into_owned();
        if text.ends_with('\r') {
            text.pop();
        }

        match std::mem::replace(&mut self.state, DecodeState::Name) {
            DecodeState::Name => {
                self.state = DecodeState::Length {
                    file_name: sanitize_file_name(&text),
                };
            }
            DecodeState::Length { file_name } => match text.trim().parse::<u64>() {
                Ok(byte_length) => {
                    events.push(BulkEvent::FileStarted(BulkTransferHeader {
                        file_name: file_name.clone(),
                        byte_length,
                    }));
                    if byte_length == 0 {
                        events.push(BulkEvent::FileCompleted {
                            file_name,
                            byte_length,
                        });
                    } else {
                        self.state = DecodeState::Body {
                            file_name,
                            byte_length,
                            received: 0,
                        };
                    }
                }
                Err(_) => self.fail(events, TransferError::InvalidLength(text)),
            },
            other => self.state = other,
        }
    }

    fn fail(&mut self, events: &mut Vec<BulkEvent>, error: TransferError) {
        self.line.clear();
        self.state = DecodeState::Discarding;
        events.push(BulkEvent::FileFailed(error));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_for(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (name, data) in files {
            bytes.extend(BulkTransferHeader::new(*name, data.len() as u64).encode());
            bytes.extend_from_slice(data);
        }
        bytes
    }

    fn collect_data(events: &[BulkEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                BulkEvent::FileData(d) => Some(d.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    #[test]
    fn test_header_encoding_matches_wire_layout() {
        let header = BulkTransferHeader::new("a.txt", 12);
        assert_eq!(header.encode(), b"a.txt\n12\n");
    }

    #[test]
    fn test_header_encoding_replaces_line_breaks_in_name() {
        let header = BulkTransferHeader::new("evil\nname", 1);
        assert_eq!(header.encode(), b"evil_name\n1\n");
    }

    #[test]
    fn test_single_push_decodes_file() {
        // Arrange
        let bytes = stream_for(&[("hello.txt", b"hello world")]);
        let mut decoder = BulkDecoder::new();

        // Act
        let events = decoder.push(&bytes);

        // Assert
        assert_eq!(
            events.first(),
            Some(&BulkEvent::FileStarted(BulkTransferHeader::new("hello.txt", 11)))
        );
        assert_eq!(collect_data(&events), b"hello world");
        assert_eq!(
            events.last(),
            Some(&BulkEvent::FileCompleted { file_name: "hello.txt".into(), byte_length: 11 })
        );
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_byte_at_a_time_pushes_decode_identically() {
        // Arrange – every read returns a single byte
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let bytes = stream_for(&[("one.bin", &payload), ("two.bin", b"xy")]);
        let mut decoder = BulkDecoder::new();

        // Act
        let events: Vec<BulkEvent> = bytes.iter().flat_map(|b| decoder.push(&[*b])).collect();

        // Assert
        let completed: Vec<&BulkEvent> = events
            .iter()
            .filter(|e| matches!(e, BulkEvent::FileCompleted { .. }))
            .collect();
        assert_eq!(completed.len(), 2);
        let mut expected = payload.clone();
        expected.extend_from_slice(b"xy");
        assert_eq!(collect_data(&events), expected);
    }

    #[test]
    fn test_zero_length_file_completes_without_data() {
        let mut decoder = BulkDecoder::new();
        let events = decoder.push(b"empty\n0\n");
        assert_eq!(
            events,
            vec![
                BulkEvent::FileStarted(BulkTransferHeader::new("empty", 0)),
                BulkEvent::FileCompleted { file_name: "empty".into(), byte_length: 0 },
            ]
        );
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let mut decoder = BulkDecoder::new();
        let events = decoder.push(b"../../etc/passwd\n0\n");
        assert_eq!(
            events[0],
            BulkEvent::FileStarted(BulkTransferHeader::new(".._.._etc_passwd", 0))
        );
    }

    #[test]
    fn test_crlf_line_endings_are_accepted() {
        let mut decoder = BulkDecoder::new();
        let events = decoder.push(b"win.txt\r\n2\r\nok");
        assert_eq!(collect_data(&events), b"ok");
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_invalid_length_discards_until_batch_end() {
        // Arrange
        let mut decoder = BulkDecoder::new();

        // Act
        let events = decoder.push(b"bad.txt\n-5\nsome bytes");
        let after = decoder.push(b"more bytes\n3\n");

        // Assert
        assert_eq!(
            events.last(),
            Some(&BulkEvent::FileFailed(TransferError::InvalidLength("-5".into())))
        );
        assert!(after.is_empty(), "input is discarded after a failed header");
        assert_eq!(decoder.end_batch(), None);

        // The next batch decodes normally.
        let next = decoder.push(b"good.txt\n1\nZ");
        assert_eq!(collect_data(&next), b"Z");
    }

    #[test]
    fn test_end_batch_mid_file_reports_incomplete() {
        let mut decoder = BulkDecoder::new();
        decoder.push(b"big.bin\n10\nabc");
        assert_eq!(
            decoder.end_batch(),
            Some(TransferError::Incomplete {
                file_name: "big.bin".into(),
                expected: 10,
                received: 3,
            })
        );
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_end_batch_mid_header_reports_truncated_header() {
        let mut decoder = BulkDecoder::new();
        decoder.push(b"name-without-newline");
        assert_eq!(decoder.end_batch(), Some(TransferError::TruncatedHeader));

        decoder.push(b"name\n");
        assert_eq!(decoder.end_batch(), Some(TransferError::TruncatedHeader));
    }

    #[test]
    fn test_end_batch_when_idle_is_clean() {
        let mut decoder = BulkDecoder::new();
        assert_eq!(decoder.end_batch(), None);
    }

    #[test]
    fn test_overlong_line_fails_transfer() {
        let mut decoder = BulkDecoder::new();
        let events = decoder.push(&vec![b'a'; MAX_LINE_LEN + 1]);
        assert_eq!(
            events,
            vec![BulkEvent::FileFailed(TransferError::LineTooLong { limit: MAX_LINE_LEN })]
        );
    }
}

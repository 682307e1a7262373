//! Integration tests for the commhub-core wire protocol.
//!
//! These tests drive the public API the way a connection does: frames are
//! concatenated into one byte stream, cut at arbitrary points, and decoded
//! again; bulk payloads are reassembled by the decoder from frame-sized
//! pieces.

use commhub_core::{
    decode_frame, encode_frame, protocol::frame::FRAME_HEADER_SIZE, BulkDecoder, BulkEvent,
    BulkTransferHeader, Frame, ProtocolError, SessionId, TransferError,
};

/// Decodes every complete frame in `stream`, returning the frames and the
/// number of bytes left over.
fn decode_all(stream: &[u8]) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut cursor = stream;
    loop {
        match decode_frame(cursor) {
            Ok((frame, used)) => {
                frames.push(frame);
                cursor = &cursor[used..];
            }
            Err(ProtocolError::InsufficientData { .. }) => return (frames, cursor.len()),
            Err(e) => panic!("unexpected decode error: {e}"),
        }
    }
}

fn sample_frames() -> Vec<Frame> {
    vec![
        Frame::Handshake(SessionId::generate()),
        Frame::Data("first".to_string()),
        Frame::Bulk(b"notes.txt\n5\n".to_vec()),
        Frame::Bulk(b"hello".to_vec()),
        Frame::BulkEnd,
        Frame::Data(String::new()),
        Frame::Data("ünïcödé ✓".to_string()),
    ]
}

#[test]
fn test_mixed_frame_stream_decodes_in_order() {
    // Arrange
    let frames = sample_frames();
    let stream: Vec<u8> = frames
        .iter()
        .flat_map(|f| encode_frame(f).expect("encode must succeed"))
        .collect();

    // Act
    let (decoded, leftover) = decode_all(&stream);

    // Assert
    assert_eq!(decoded, frames);
    assert_eq!(leftover, 0);
}

#[test]
fn test_every_prefix_of_a_stream_decodes_a_prefix_of_frames() {
    // Arrange
    let frames = sample_frames();
    let stream: Vec<u8> = frames
        .iter()
        .flat_map(|f| encode_frame(f).expect("encode must succeed"))
        .collect();

    // Act + Assert – cutting the stream anywhere never yields garbage
    for cut in 0..=stream.len() {
        let (decoded, _) = decode_all(&stream[..cut]);
        assert_eq!(decoded[..], frames[..decoded.len()], "cut at {cut}");
    }
}

#[test]
fn test_empty_frames_are_header_only() {
    let bytes = encode_frame(&Frame::BulkEnd).unwrap();
    assert_eq!(bytes.len(), FRAME_HEADER_SIZE);
}

#[test]
fn test_bulk_decoder_reassembles_two_files_from_any_split() {
    // Arrange – two files back to back in one bulk stream
    let mut stream = BulkTransferHeader::new("a.bin", 300).encode();
    stream.extend((0..300u32).map(|i| i as u8));
    stream.extend(BulkTransferHeader::new("b.txt", 3).encode());
    stream.extend_from_slice(b"end");

    for chunk in [1usize, 2, 7, 64, 4096] {
        // Act
        let mut decoder = BulkDecoder::new();
        let mut a = Vec::new();
        let mut b = Vec::new();
        let mut current = String::new();
        let mut completed = Vec::new();
        for piece in stream.chunks(chunk) {
            for event in decoder.push(piece) {
                match event {
                    BulkEvent::FileStarted(header) => current = header.file_name,
                    BulkEvent::FileData(bytes) if current == "a.bin" => a.extend(bytes),
                    BulkEvent::FileData(bytes) => b.extend(bytes),
                    BulkEvent::FileCompleted { file_name, .. } => completed.push(file_name),
                    BulkEvent::FileFailed(e) => panic!("chunk {chunk}: {e}"),
                }
            }
        }

        // Assert
        assert_eq!(completed, vec!["a.bin", "b.txt"], "chunk {chunk}");
        assert_eq!(a, (0..300u32).map(|i| i as u8).collect::<Vec<_>>());
        assert_eq!(b, b"end");
        assert_eq!(decoder.end_batch(), None);
    }
}

#[test]
fn test_bulk_decoder_recovers_after_invalid_length_at_batch_end() {
    // Arrange
    let mut decoder = BulkDecoder::new();

    // Act – a bad length line, then trailing bytes, then a clean batch
    let failed = decoder.push(b"bad.bin\ntwelve\nignored bytes");
    let after_end = decoder.end_batch();
    let recovered = decoder.push(b"ok.txt\n2\nhi");

    // Assert
    assert_eq!(
        failed.last(),
        Some(&BulkEvent::FileFailed(TransferError::InvalidLength("twelve".to_string())))
    );
    assert_eq!(after_end, None);
    assert_eq!(
        recovered.last(),
        Some(&BulkEvent::FileCompleted {
            file_name: "ok.txt".to_string(),
            byte_length: 2
        })
    );
}

//! Bulk file transfer over an open session.
//!
//! # Sending
//!
//! [`send_file`] writes one file as a header (`name\nlength\n`) followed by
//! its bytes, split into `Bulk` frames of at most `chunk_size` bytes.
//! [`send_folder`] sends every regular file of a folder in name order and
//! closes the batch with a `BulkEnd` frame.
//!
//! Both hold the session's bulk lane for the whole transfer, so concurrent
//! senders on one session queue up behind each other instead of mixing
//! their bytes into one corrupt stream.
//!
//! If a source ends before its announced length, the sender emits `BulkEnd`
//! straight away.  The receiver then reports the file as incomplete and is
//! back at a clean header boundary, so the session stays usable.
//!
//! # Receiving
//!
//! [`BulkReceiver`] drives a [`BulkDecoder`] and writes each file into the
//! [`FileStore`].  A file that fails part-way is deleted rather than left
//! truncated on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use commhub_core::{
    BulkDecoder, BulkEvent, BulkTransferHeader, Frame, SessionId, TransferError,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::session::{Session, SessionError};
use crate::infrastructure::storage::file_store::{FileStore, StorageError};

/// Default size of one `Bulk` frame payload.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Errors raised while sending files.
#[derive(Debug, Error)]
pub enum FileTransferError {
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("reading {file_name} failed: {source}")]
    Read {
        file_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not connected")]
    NotConnected,
    #[error("a server must name the destination session for a file transfer")]
    MissingDestination,
    #[error("unknown destination session: {0}")]
    UnknownDestination(SessionId),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Outcome of [`send_folder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files_sent: usize,
    pub bytes_sent: u64,
    pub files_failed: usize,
}

/// Streams one file over `session`.
///
/// Reads exactly `byte_length` bytes from `reader`.  Returns the number of
/// bytes sent.
///
/// # Errors
///
/// - [`TransferError::Incomplete`] (wrapped) if `reader` ends early.
/// - [`FileTransferError::Read`] if `reader` fails.
/// - [`FileTransferError::Session`] if the session closes.
///
/// In the first two cases a `BulkEnd` frame has already been queued so the
/// receiver drops the partial file.
pub async fn send_file<R>(
    session: &Session,
    file_name: &str,
    byte_length: u64,
    reader: R,
    chunk_size: usize,
) -> Result<u64, FileTransferError>
where
    R: AsyncRead + Unpin,
{
    let _lane = session.bulk_lane().await;
    write_file(session, file_name, byte_length, reader, chunk_size).await
}

/// Body of [`send_file`]; the caller holds the bulk lane.
async fn write_file<R>(
    session: &Session,
    file_name: &str,
    byte_length: u64,
    reader: R,
    chunk_size: usize,
) -> Result<u64, FileTransferError>
where
    R: AsyncRead + Unpin,
{
    let header = BulkTransferHeader::new(file_name, byte_length);
    session.enqueue(Frame::Bulk(header.encode())).await?;

    let mut body = reader.take(byte_length);
    let mut sent: u64 = 0;
    let mut buf = vec![0u8; chunk_size.max(1)];

    while sent < byte_length {
        let n = match body.read(&mut buf).await {
            Ok(n) => n,
            Err(source) => {
                session.enqueue(Frame::BulkEnd).await?;
                return Err(FileTransferError::Read {
                    file_name: file_name.to_string(),
                    source,
                });
            }
        };
        if n == 0 {
            session.enqueue(Frame::BulkEnd).await?;
            return Err(TransferError::Incomplete {
                file_name: file_name.to_string(),
                expected: byte_length,
                received: sent,
            }
            .into());
        }
        session.enqueue(Frame::Bulk(buf[..n].to_vec())).await?;
        sent += n as u64;
    }

    debug!(session = %session.id(), file = file_name, bytes = sent, "file queued");
    Ok(sent)
}

/// Sends every regular file directly inside `folder`, in name order.
///
/// Files that cannot be opened, or that shrink while being read, are counted
/// in [`TransferSummary::files_failed`] and the rest of the folder is still
/// sent.  Returns once everything has been written to the socket.
///
/// # Errors
///
/// Returns [`FileTransferError::Io`] if the folder cannot be listed and
/// [`FileTransferError::Session`] if the session closes.
pub async fn send_folder(
    session: &Session,
    folder: &Path,
    chunk_size: usize,
) -> Result<TransferSummary, FileTransferError> {
    let files = list_regular_files(folder).await?;
    let _lane = session.bulk_lane().await;
    let mut summary = TransferSummary::default();

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                summary.files_failed += 1;
                continue;
            }
        };
        let byte_length = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                summary.files_failed += 1;
                continue;
            }
        };

        match write_file(session, &file_name, byte_length, file, chunk_size).await {
            Ok(bytes) => {
                info!(file = %file_name, bytes, "file sent");
                summary.files_sent += 1;
                summary.bytes_sent += bytes;
            }
            Err(FileTransferError::Session(e)) => return Err(e.into()),
            Err(e) => {
                warn!(file = %file_name, "file transfer failed: {e}");
                summary.files_failed += 1;
            }
        }
    }

    session.enqueue(Frame::BulkEnd).await?;
    session.flush().await?;
    Ok(summary)
}

async fn list_regular_files(folder: &Path) -> Result<Vec<PathBuf>, FileTransferError> {
    let io_err = |source| FileTransferError::Io {
        path: folder.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(folder).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        match entry.file_type().await {
            Ok(kind) if kind.is_file() => files.push(entry.path()),
            Ok(_) => debug!("not a regular file, skipping {}", entry.path().display()),
            Err(e) => warn!("cannot stat {}: {e}", entry.path().display()),
        }
    }
    files.sort();
    Ok(files)
}

// ── Receiving ─────────────────────────────────────────────────────────────────

struct IncomingFile {
    path: PathBuf,
    file: tokio::fs::File,
    header: BulkTransferHeader,
}

/// Receive side of the bulk stream for one session.
pub struct BulkReceiver {
    store: Arc<FileStore>,
    session_id: SessionId,
    decoder: BulkDecoder,
    current: Option<IncomingFile>,
    completed: Vec<PathBuf>,
}

impl BulkReceiver {
    pub fn new(store: Arc<FileStore>, session_id: SessionId) -> Self {
        Self {
            store,
            session_id,
            decoder: BulkDecoder::new(),
            current: None,
            completed: Vec::new(),
        }
    }

    /// Paths of every file this receiver stored completely.
    pub fn completed(&self) -> &[PathBuf] {
        &self.completed
    }

    /// Handles the payload of one `Bulk` frame.
    pub async fn push(&mut self, bytes: &[u8]) {
        for event in self.decoder.push(bytes) {
            self.on_event(event).await;
        }
    }

    /// Handles a `BulkEnd` frame.
    pub async fn end_batch(&mut self) {
        if let Some(error) = self.decoder.end_batch() {
            self.abort(&error).await;
        }
    }

    /// Handles the end of the stream.  A file still in progress is removed.
    pub async fn finish(&mut self) {
        self.end_batch().await;
        if let Some(incoming) = self.current.take() {
            remove_partial(&incoming.path).await;
        }
    }

    async fn on_event(&mut self, event: BulkEvent) {
        match event {
            BulkEvent::FileStarted(header) => {
                match self.store.create(&self.session_id, &header.file_name).await {
                    Ok((path, file)) => {
                        debug!(
                            session = %self.session_id,
                            file = %header.file_name,
                            bytes = header.byte_length,
                            "receiving file"
                        );
                        self.current = Some(IncomingFile { path, file, header });
                    }
                    Err(e) => {
                        warn!(session = %self.session_id, "cannot store {}: {e}", header.file_name);
                        self.current = None;
                    }
                }
            }
            BulkEvent::FileData(bytes) => {
                let Some(incoming) = self.current.as_mut() else {
                    return;
                };
                if let Err(e) = incoming.file.write_all(&bytes).await {
                    let error = StorageError::Io {
                        path: incoming.path.clone(),
                        source: e,
                    };
                    warn!(session = %self.session_id, "write failed: {error}");
                    if let Some(incoming) = self.current.take() {
                        remove_partial(&incoming.path).await;
                    }
                }
            }
            BulkEvent::FileCompleted { file_name, byte_length } => {
                let Some(mut incoming) = self.current.take() else {
                    return;
                };
                if let Err(e) = incoming.file.flush().await {
                    warn!(session = %self.session_id, "flushing {} failed: {e}", incoming.path.display());
                    remove_partial(&incoming.path).await;
                    return;
                }
                info!(
                    session = %self.session_id,
                    file = %file_name,
                    bytes = byte_length,
                    "stored {}",
                    incoming.path.display()
                );
                self.completed.push(incoming.path);
            }
            BulkEvent::FileFailed(error) => self.abort(&error).await,
        }
    }

    async fn abort(&mut self, error: &TransferError) {
        match self.current.take() {
            Some(incoming) => {
                warn!(
                    session = %self.session_id,
                    file = %incoming.header.file_name,
                    "transfer aborted: {error}"
                );
                remove_partial(&incoming.path).await;
            }
            None => warn!(session = %self.session_id, "transfer aborted: {error}"),
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed partial file {}", path.display()),
        Err(e) => warn!("could not remove partial file {}: {e}", path.display()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use commhub_core::{decode_frame, Role};
    use tokio::io::AsyncReadExt as _;

    use super::*;

    fn session_over_pipe(capacity: usize) -> (Arc<Session>, tokio::io::DuplexStream) {
        let (w, r) = tokio::io::duplex(16 * 1024 * 1024);
        let session = Session::spawn(
            SessionId::generate(),
            Role::Client,
            "127.0.0.1:5000".parse().unwrap(),
            w,
            capacity,
        );
        session.open();
        (session, r)
    }

    async fn frames_written(session: Arc<Session>, mut r: tokio::io::DuplexStream) -> Vec<Frame> {
        session.close_and_wait().await;
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes).await.unwrap();
        let mut cursor = &bytes[..];
        let mut frames = Vec::new();
        while !cursor.is_empty() {
            let (frame, used) = decode_frame(cursor).unwrap();
            frames.push(frame);
            cursor = &cursor[used..];
        }
        frames
    }

    #[tokio::test]
    async fn test_send_file_splits_body_into_chunks() {
        // Arrange
        let (session, r) = session_over_pipe(64);
        let body = vec![7u8; 10];

        // Act
        let sent = send_file(&session, "a.bin", 10, &body[..], 4).await.unwrap();
        session.flush().await.unwrap();

        // Assert
        assert_eq!(sent, 10);
        let frames = frames_written(session, r).await;
        assert_eq!(
            frames,
            vec![
                Frame::Bulk(b"a.bin\n10\n".to_vec()),
                Frame::Bulk(vec![7; 4]),
                Frame::Bulk(vec![7; 4]),
                Frame::Bulk(vec![7; 2]),
            ]
        );
    }

    #[tokio::test]
    async fn test_short_source_reports_incomplete_and_ends_batch() {
        // Arrange – announce 100 bytes, provide 30
        let (session, r) = session_over_pipe(64);
        let body = vec![1u8; 30];

        // Act
        let result = send_file(&session, "short.bin", 100, &body[..], 4096).await;
        session.flush().await.unwrap();

        // Assert
        assert!(matches!(
            result,
            Err(FileTransferError::Transfer(TransferError::Incomplete {
                expected: 100,
                received: 30,
                ..
            }))
        ));
        let frames = frames_written(session, r).await;
        assert_eq!(frames.last(), Some(&Frame::BulkEnd));
    }

    #[tokio::test]
    async fn test_send_folder_sends_regular_files_in_name_order() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.txt"), b"bee").unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"ay").unwrap();
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();
        let (session, r) = session_over_pipe(64);

        // Act
        let summary = send_folder(&session, tmp.path(), 4096).await.unwrap();

        // Assert
        assert_eq!(
            summary,
            TransferSummary {
                files_sent: 2,
                bytes_sent: 5,
                files_failed: 0
            }
        );
        let frames = frames_written(session, r).await;
        assert_eq!(
            frames,
            vec![
                Frame::Bulk(b"a.txt\n2\n".to_vec()),
                Frame::Bulk(b"ay".to_vec()),
                Frame::Bulk(b"b.txt\n3\n".to_vec()),
                Frame::Bulk(b"bee".to_vec()),
                Frame::BulkEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_folder_sends_do_not_interleave() {
        // Arrange – two folders, one multi-chunk file each, one session
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let a: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let b: Vec<u8> = (0..50_000u32).map(|i| (i % 127) as u8 + 100).collect();
        std::fs::write(first.path().join("a.bin"), &a).unwrap();
        std::fs::write(second.path().join("b.bin"), &b).unwrap();
        let (session, r) = session_over_pipe(4);

        // Act
        let (left, right) = tokio::join!(
            send_folder(&session, first.path(), 1024),
            send_folder(&session, second.path(), 1024),
        );

        // Assert – replaying the bulk stream yields both files intact
        assert_eq!(left.unwrap().files_sent, 1);
        assert_eq!(right.unwrap().files_sent, 1);
        let mut decoder = BulkDecoder::new();
        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        for frame in frames_written(session, r).await {
            let events = match frame {
                Frame::Bulk(bytes) => decoder.push(&bytes),
                Frame::BulkEnd => {
                    assert_eq!(decoder.end_batch(), None);
                    continue;
                }
                other => panic!("unexpected frame {other:?}"),
            };
            for event in events {
                match event {
                    BulkEvent::FileStarted(h) => files.push((h.file_name, Vec::new())),
                    BulkEvent::FileData(d) => files.last_mut().unwrap().1.extend(d),
                    BulkEvent::FileCompleted { .. } => {}
                    BulkEvent::FileFailed(e) => panic!("transfer failed: {e}"),
                }
            }
        }
        files.sort();
        assert_eq!(files, vec![("a.bin".to_string(), a), ("b.bin".to_string(), b)]);
    }

    #[tokio::test]
    async fn test_send_folder_on_missing_folder_is_io_error() {
        let (session, _r) = session_over_pipe(8);
        let result = send_folder(&session, Path::new("/definitely/not/here"), 4096).await;
        assert!(matches!(result, Err(FileTransferError::Io { .. })));
    }

    #[tokio::test]
    async fn test_receiver_stores_file_split_across_pushes() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(tmp.path()).unwrap());
        let session_id: SessionId = "peer1".parse().unwrap();
        let mut receiver = BulkReceiver::new(store, session_id);

        // Act
        receiver.push(b"hello.txt\n1").await;
        receiver.push(b"1\nhello ").await;
        receiver.push(b"world").await;
        receiver.end_batch().await;

        // Assert
        let stored = tmp.path().join("peer1_hello.txt");
        assert_eq!(receiver.completed(), &[stored.clone()]);
        assert_eq!(std::fs::read(stored).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_receiver_removes_file_cut_short_by_batch_end() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(tmp.path()).unwrap());
        let mut receiver = BulkReceiver::new(store, "peer2".parse().unwrap());

        // Act
        receiver.push(b"big.bin\n100\nonly a few bytes").await;
        receiver.end_batch().await;
        receiver.push(b"next.txt\n2\nok").await;
        receiver.finish().await;

        // Assert
        assert!(!tmp.path().join("peer2_big.bin").exists());
        assert_eq!(std::fs::read(tmp.path().join("peer2_next.txt")).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_receiver_removes_partial_file_at_end_of_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(tmp.path()).unwrap());
        let mut receiver = BulkReceiver::new(store, "peer3".parse().unwrap());

        receiver.push(b"cut.bin\n10\nabc").await;
        receiver.finish().await;

        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }
}

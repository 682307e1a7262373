//! Session: one live TCP connection and its outbound queues.
//!
//! # Write path
//!
//! Callers never touch the socket.  `enqueue` pushes a [`Frame`] onto one of
//! two bounded `mpsc` lanes, and a dedicated writer task drains them and
//! writes each encoded frame with `write_all`:
//!
//! - the **control lane** carries `Handshake` and `Data` frames, and
//! - the **bulk lane** carries `Bulk` and `BulkEnd` frames.
//!
//! The writer always prefers the control lane, so a file transfer that keeps
//! the bulk lane full never starves module messages.  Order is FIFO within a
//! lane; the receiver tells the lanes apart by frame kind.  Frames from
//! concurrent callers never interleave on the wire, and a slow peer applies
//! back-pressure to its own queues only.
//!
//! Whole transfers are serialized with [`Session::bulk_lane`]: a sender holds
//! that guard from its first header frame to its last `BulkEnd`.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──open()──▶ Open ──close()──▶ Closing ──writer exits──▶ Closed
//!      │                                      ▲
//!      └──────────────close()─────────────────┘
//! ```
//!
//! `Connecting` accepts frames so the server can queue its handshake before
//! the session is published.  `close()` is idempotent; it signals the writer
//! task through a `watch` channel, which drops whatever is still queued and
//! shuts the write half down.  A failed write closes the session and runs the
//! hook installed with [`Session::on_writer_fault`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use commhub_core::{encode_frame, Frame, ProtocolError, Role, SessionId, SessionInfo};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Errors raised by a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(SessionId),
    #[error("outbound queue of session {0} is full")]
    QueueFull(SessionId),
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

enum Outbound {
    Frame(Frame),
    Flush(oneshot::Sender<()>),
}

type FaultHook = Box<dyn FnOnce(&SessionId) + Send>;

/// One live connection.
///
/// Always handled as `Arc<Session>`: the registry, the dispatcher, and the
/// read loop all hold a reference.
pub struct Session {
    id: SessionId,
    role: Role,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    control: mpsc::Sender<Outbound>,
    bulk: mpsc::Sender<Outbound>,
    bulk_transfer: AsyncMutex<()>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the session handle and its writer task.
struct Shared {
    state: AtomicU8,
    close_tx: watch::Sender<bool>,
    fault_hook: Mutex<Option<FaultHook>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `Closing` and wakes every waiter.  Returns `true` for the
    /// call that performed the transition.
    fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.close_tx.send_replace(true);
        true
    }

    fn take_fault_hook(&self) -> Option<FaultHook> {
        self.fault_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Session {
    /// Creates a session in the `Connecting` state and spawns its writer task.
    ///
    /// `capacity` bounds each lane; zero is raised to one.
    pub fn spawn<W>(
        id: SessionId,
        role: Role,
        peer_addr: SocketAddr,
        writer: W,
        capacity: usize,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (control, control_rx) = mpsc::channel(capacity.max(1));
        let (bulk, bulk_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(SessionState::Connecting as u8),
            close_tx,
            fault_hook: Mutex::new(None),
        });

        let task = tokio::spawn(write_loop(
            id.clone(),
            writer,
            Lanes {
                control: control_rx,
                bulk: bulk_rx,
            },
            Arc::clone(&shared),
        ));

        Arc::new(Self {
            id,
            role,
            peer_addr,
            shared,
            control,
            bulk,
            bulk_transfer: AsyncMutex::new(()),
            writer: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            role: self.role,
            peer_addr: self.peer_addr,
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Moves `Connecting` to `Open`.  Returns `false` from any other state.
    pub fn open(&self) -> bool {
        self.shared
            .state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Begins closing the session.
    ///
    /// Returns `true` for the call that performed the transition and `false`
    /// if the session was already closing or closed.
    pub fn close(&self) -> bool {
        let first = self.shared.begin_close();
        if first {
            debug!(session = %self.id, "closing session");
        }
        first
    }

    /// Closes the session and waits for the writer task to finish.
    pub async fn close_and_wait(&self) {
        self.close();
        let task = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(session = %self.id, "writer task ended abnormally: {e}");
            }
        }
    }

    /// Resolves once the session has started closing.
    pub async fn closed(&self) {
        let mut rx = self.shared.close_tx.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail here.
        let _ = rx.wait_for(|closing| *closing).await;
    }

    /// Installs `hook`, run once on the writer task if a socket write fails.
    ///
    /// A later call replaces an earlier hook.  A session closed normally
    /// never runs it.
    pub fn on_writer_fault<F>(&self, hook: F)
    where
        F: FnOnce(&SessionId) + Send + 'static,
    {
        *self
            .shared
            .fault_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Waits for exclusive use of the bulk lane.
    ///
    /// Hold the guard for a whole transfer so two senders never interleave
    /// their `Bulk` frames in the receiver's byte stream.
    pub async fn bulk_lane(&self) -> AsyncMutexGuard<'_, ()> {
        self.bulk_transfer.lock().await
    }

    /// Queues `frame`, waiting for room if its lane is full.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session is closing.
    pub async fn enqueue(&self, frame: Frame) -> Result<(), SessionError> {
        self.ensure_accepting()?;
        self.lane_for(&frame)
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| SessionError::Closed(self.id.clone()))
    }

    /// Queues `frame` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] when the lane is at capacity and
    /// [`SessionError::Closed`] once the session is closing.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), SessionError> {
        self.ensure_accepting()?;
        self.lane_for(&frame)
            .try_send(Outbound::Frame(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SessionError::QueueFull(self.id.clone()),
                mpsc::error::TrySendError::Closed(_) => SessionError::Closed(self.id.clone()),
            })
    }

    /// Waits until every frame queued before this call, on either lane, has
    /// been written.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session closes first.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.ensure_accepting()?;
        let (done_tx, done_rx) = oneshot::channel();
        self.bulk
            .send(Outbound::Flush(done_tx))
            .await
            .map_err(|_| SessionError::Closed(self.id.clone()))?;
        done_rx
            .await
            .map_err(|_| SessionError::Closed(self.id.clone()))
    }

    fn lane_for(&self, frame: &Frame) -> &mpsc::Sender<Outbound> {
        match frame {
            Frame::Bulk(_) | Frame::BulkEnd => &self.bulk,
            Frame::Handshake(_) | Frame::Data(_) => &self.control,
        }
    }

    fn ensure_accepting(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Connecting | SessionState::Open => Ok(()),
            SessionState::Closing | SessionState::Closed => {
                Err(SessionError::Closed(self.id.clone()))
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

struct Lanes {
    control: mpsc::Receiver<Outbound>,
    bulk: mpsc::Receiver<Outbound>,
}

/// Why the writer stopped in the middle of a write.
enum Stop {
    Closed,
    Failed(std::io::Error),
}

/// Drains both lanes onto the socket until the session closes.
async fn write_loop<W>(id: SessionId, mut writer: W, mut lanes: Lanes, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut close_rx = shared.close_tx.subscribe();
    loop {
        let next = tokio::select! {
            biased;
            _ = close_rx.wait_for(|closing| *closing) => break,
            next = lanes.control.recv() => next,
            next = lanes.bulk.recv() => next,
        };

        let outcome = match next {
            Some(Outbound::Frame(frame)) => write_frame(&id, &mut writer, &mut close_rx, &frame).await,
            Some(Outbound::Flush(done)) => {
                // Control frames queued before the flush may still be waiting.
                let drained = drain_control(&id, &mut writer, &mut close_rx, &mut lanes.control).await;
                if drained.is_ok() {
                    // The caller may have given up waiting; that is fine.
                    let _ = done.send(());
                }
                drained
            }
            None => break,
        };

        match outcome {
            Ok(()) => {}
            Err(Stop::Closed) => break,
            Err(Stop::Failed(e)) => {
                warn!(session = %id, "write failed: {e}");
                shared.begin_close();
                if let Some(hook) = shared.take_fault_hook() {
                    hook(&id);
                }
                break;
            }
        }
    }

    // Anything still queued is dropped with the receivers.
    lanes.control.close();
    lanes.bulk.close();
    if let Err(e) = writer.shutdown().await {
        debug!(session = %id, "socket shutdown failed: {e}");
    }
    shared.begin_close();
    shared.state.store(SessionState::Closed as u8, Ordering::Release);
    debug!(session = %id, "writer task finished");
}

async fn write_frame<W>(
    id: &SessionId,
    writer: &mut W,
    close_rx: &mut watch::Receiver<bool>,
    frame: &Frame,
) -> Result<(), Stop>
where
    W: AsyncWrite + Unpin,
{
    let bytes = match encode_frame(frame) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(session = %id, "dropping unencodable frame: {e}");
            return Ok(());
        }
    };

    let written = tokio::select! {
        biased;
        _ = close_rx.wait_for(|closing| *closing) => return Err(Stop::Closed),
        res = writer.write_all(&bytes) => res,
    };
    written.map_err(Stop::Failed)?;
    trace!(session = %id, kind = ?frame.kind(), len = bytes.len(), "frame written");
    Ok(())
}

async fn drain_control<W>(
    id: &SessionId,
    writer: &mut W,
    close_rx: &mut watch::Receiver<bool>,
    control: &mut mpsc::Receiver<Outbound>,
) -> Result<(), Stop>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(outbound) = control.try_recv() {
        match outbound {
            Outbound::Frame(frame) => write_frame(id, writer, close_rx, &frame).await?,
            Outbound::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Dispatcher: routes outbound messages to sessions and inbound frames to
//! modules.
//!
//! # Outbound
//!
//! | Role   | destination      | Effect                                   |
//! |--------|------------------|------------------------------------------|
//! | Server | `Some(id)`       | unicast to that session                  |
//! | Server | `None`           | broadcast to every live session          |
//! | Client | ignored          | sent to the single upstream server       |
//!
//! Sends never block on a slow peer.  A broadcast uses `try_enqueue`; a
//! session whose queue is full misses that message and the others are
//! unaffected.
//!
//! # Inbound
//!
//! Each session has one read loop ([`Dispatcher::run_read_loop`]).  `Data`
//! frames fan out to the [`ModuleRegistry`]; `Bulk` and `BulkEnd` frames feed
//! the session's [`BulkReceiver`].  When the loop ends, for whatever reason,
//! the session is unregistered and `on_client_left` fires exactly once.

use std::sync::{Arc, PoisonError, RwLock};

use commhub_core::{Frame, Role, SessionId};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::bulk_transfer::BulkReceiver;
use super::frame_io::FrameReader;
use super::session::{Session, SessionError};
use super::session_registry::SessionRegistry;
use crate::application::module_registry::ModuleRegistry;
use crate::infrastructure::storage::file_store::FileStore;

/// Errors returned by [`Dispatcher::send`].
#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown destination session: {0}")]
    UnknownDestination(SessionId),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Routing core shared by the listener, the read loops, and the public API.
pub struct Dispatcher {
    role: Role,
    sessions: Arc<SessionRegistry>,
    modules: Arc<ModuleRegistry>,
    upstream: RwLock<Option<Arc<Session>>>,
    file_store: Option<Arc<FileStore>>,
}

impl Dispatcher {
    pub fn new(role: Role, modules: Arc<ModuleRegistry>, file_store: Option<Arc<FileStore>>) -> Self {
        Self {
            role,
            sessions: Arc::new(SessionRegistry::new()),
            modules,
            upstream: RwLock::new(None),
            file_store,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Sends `payload` on behalf of `module`.
    ///
    /// The module name is dispatch metadata only; it is logged but not
    /// written to the wire.
    ///
    /// # Errors
    ///
    /// - [`SendError::UnknownDestination`] when a server unicast names a
    ///   session that is not registered.
    /// - [`SendError::NotConnected`] when a client has no upstream session.
    /// - [`SendError::Session`] when the target session is closed or its
    ///   queue is full.
    pub fn send(
        &self,
        payload: &str,
        module: &str,
        destination: Option<&SessionId>,
    ) -> Result<(), SendError> {
        match self.role {
            Role::Client => {
                if let Some(dest) = destination {
                    debug!(module, destination = %dest, "client sends always go upstream");
                }
                let upstream = self.upstream().ok_or(SendError::NotConnected)?;
                upstream.try_enqueue(Frame::Data(payload.to_string()))?;
                trace!(module, "data queued upstream");
                Ok(())
            }
            Role::Server => match destination {
                Some(dest) => {
                    let Some(session) = self.sessions.get(dest) else {
                        warn!(module, destination = %dest, "send to unknown session");
                        return Err(SendError::UnknownDestination(dest.clone()));
                    };
                    session.try_enqueue(Frame::Data(payload.to_string()))?;
                    trace!(module, destination = %dest, "data queued");
                    Ok(())
                }
                None => {
                    let delivered = self.broadcast(payload);
                    trace!(module, delivered, "data broadcast");
                    Ok(())
                }
            },
        }
    }

    /// Queues `payload` on every live session and returns how many accepted it.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0;
        for session in self.sessions.snapshot() {
            match session.try_enqueue(Frame::Data(payload.to_string())) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(session = %session.id(), "broadcast skipped: {e}"),
            }
        }
        delivered
    }

    /// Publishes a session that has completed its handshake and notifies
    /// every module.
    ///
    /// A session whose writer fails is unregistered from its writer task, so
    /// the registry never keeps a dead id until the read loop notices.
    pub fn register(self: &Arc<Self>, session: Arc<Session>) {
        let dispatcher = Arc::downgrade(self);
        session.on_writer_fault(move |id| {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.unregister(id);
            }
        });

        match self.role {
            Role::Server => {
                if let Some(previous) = self.sessions.add(Arc::clone(&session)) {
                    warn!(session = %previous.id(), "session id reused; closing the older session");
                    previous.close();
                }
            }
            Role::Client => {
                let previous = self
                    .upstream
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(Arc::clone(&session));
                if let Some(previous) = previous {
                    previous.close();
                }
            }
        }
        info!(session = %session.id(), peer = %session.peer_addr(), "session joined");
        self.modules.notify_joined(&session.info());
    }

    /// Removes the session for `id` and fires `on_client_left`.
    ///
    /// Returns `None` (and notifies nobody) if the session was already gone,
    /// so concurrent callers produce exactly one notification.
    pub fn unregister(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = match self.role {
            Role::Server => self.sessions.remove(id),
            Role::Client => {
                let mut upstream = self
                    .upstream
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                if upstream.as_ref().is_some_and(|s| s.id() == id) {
                    upstream.take()
                } else {
                    None
                }
            }
        }?;
        removed.close();
        info!(session = %id, "session left");
        self.modules.notify_left(id);
        Some(removed)
    }

    /// Removes every session at once and fires `on_client_left` for each.
    ///
    /// Read loops that end afterwards find their id gone and stay silent.
    pub fn unregister_all(&self) -> Vec<Arc<Session>> {
        let removed: Vec<Arc<Session>> = match self.role {
            Role::Server => self.sessions.drain(),
            Role::Client => self
                .upstream
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .into_iter()
                .collect(),
        };
        for session in &removed {
            session.close();
            info!(session = %session.id(), "session left");
            self.modules.notify_left(session.id());
        }
        removed
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        match self.role {
            Role::Server => self.sessions.get(id),
            Role::Client => self.upstream().filter(|s| s.id() == id),
        }
    }

    pub fn upstream(&self) -> Option<Arc<Session>> {
        self.upstream
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every session currently registered, for either role.
    pub fn live_sessions(&self) -> Vec<Arc<Session>> {
        match self.role {
            Role::Server => self.sessions.snapshot(),
            Role::Client => self.upstream().into_iter().collect(),
        }
    }

    /// Reads frames from `reader` until the peer disconnects, the session
    /// closes, or `shutdown` turns `true`.
    pub async fn run_read_loop<R>(
        self: Arc<Self>,
        session: Arc<Session>,
        mut reader: FrameReader<R>,
        mut shutdown: watch::Receiver<bool>,
    ) where
        R: AsyncRead + Unpin,
    {
        let id = session.id().clone();
        let mut bulk = self
            .file_store
            .as_ref()
            .map(|store| BulkReceiver::new(Arc::clone(store), id.clone()));

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!(session = %id, "read loop stopping for shutdown");
                    break;
                }
                _ = session.closed() => {
                    debug!(session = %id, "read loop stopping; session closed");
                    break;
                }
                next = reader.next_frame() => next,
            };

            match next {
                Ok(Some(Frame::Data(text))) => self.modules.notify_data(&text),
                Ok(Some(Frame::Bulk(bytes))) => match bulk.as_mut() {
                    Some(receiver) => receiver.push(&bytes).await,
                    None => trace!(session = %id, "no storage folder; bulk bytes dropped"),
                },
                Ok(Some(Frame::BulkEnd)) => {
                    if let Some(receiver) = bulk.as_mut() {
                        receiver.end_batch().await;
                    }
                }
                Ok(Some(Frame::Handshake(other))) => {
                    warn!(session = %id, announced = %other, "unexpected handshake ignored");
                }
                Ok(None) => {
                    debug!(session = %id, "peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(session = %id, "read failed: {e}");
                    break;
                }
            }
        }

        if let Some(receiver) = bulk.as_mut() {
            receiver.finish().await;
        }
        self.unregister(&id);
        session.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

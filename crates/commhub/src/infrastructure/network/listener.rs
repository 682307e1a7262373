//! Listener: server-side accept loop and client-side connect.
//!
//! # Server
//!
//! [`bind`] opens the TCP listener and [`accept_loop`] admits connections
//! until the hub-wide shutdown signal fires.  Admitting a connection:
//!
//! 1. Generate a fresh [`SessionId`] not already in the registry.
//! 2. Spawn the [`Session`] (writer task) and queue `Handshake(id)` as its
//!    very first frame.
//! 3. Mark the session `Open`, register it (which fires `on_client_joined`),
//!    and spawn its read loop.
//!
//! The handshake is queued before the session is published, so no other
//! frame can reach the wire ahead of it.
//!
//! # Client
//!
//! [`connect`] resolves the server address, connects with a timeout, and
//! waits (again with a timeout) for the server's `Handshake` frame.  The id
//! it carries becomes the client's own session id.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use commhub_core::{Frame, Role, SessionId};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::dispatcher::Dispatcher;
use super::frame_io::FrameReader;
use super::session::Session;
use crate::infrastructure::storage::file_store::StorageError;

/// Pause after a failed `accept()` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors raised while starting a hub.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid port {0:?}: expected an integer between 1 and 65535")]
    InvalidPort(String),
    #[error("a client needs the server address and port")]
    MissingPeer,
    #[error("cannot resolve server address {0:?}")]
    InvalidAddress(String),
    #[error("cannot listen on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("handshake with {addr} failed: {reason}")]
    Handshake { addr: SocketAddr, reason: String },
    #[error("no handshake from {addr} within {timeout:?}")]
    HandshakeTimeout { addr: SocketAddr, timeout: Duration },
    #[error("the hub is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Settings the listener needs from the hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

/// Parses a decimal port number in `1..=65535`.
///
/// # Errors
///
/// Returns [`StartError::InvalidPort`] for anything else, including `0`.
pub fn parse_port(raw: &str) -> Result<u16, StartError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(StartError::InvalidPort(raw.to_string())),
    }
}

/// Binds the server socket.
///
/// # Errors
///
/// Returns [`StartError::BindFailed`] if the address is in use or not
/// available on this host.
pub async fn bind(ip: IpAddr, port: u16) -> Result<TcpListener, StartError> {
    let addr = SocketAddr::new(ip, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartError::BindFailed { addr, source })?;
    info!("listening on {addr}");
    Ok(listener)
}

/// Returns the `ip:port` a peer should use to reach `local`.
///
/// A wildcard bind address is replaced by the host's primary IPv4 address,
/// falling back to loopback when no route exists.
pub fn advertised_endpoint(local: SocketAddr) -> String {
    let ip = if local.ip().is_unspecified() {
        primary_ipv4().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    } else {
        local.ip()
    };
    SocketAddr::new(ip, local.port()).to_string()
}

/// Finds the address of the interface holding the default route.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
fn primary_ipv4() -> Option<IpAddr> {
    let route = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    route.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    let ip = route.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Accepts connections until `shutdown` turns `true`.
pub async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    settings: ListenerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => {
                info!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                admit(stream, peer_addr, &dispatcher, settings, shutdown.clone());
            }
            Err(e) => {
                // Usually transient, such as running out of file descriptors.
                error!("accept error: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

fn admit(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: &Arc<Dispatcher>,
    settings: ListenerSettings,
    shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {peer_addr}: {e}");
    }

    let id = loop {
        let candidate = SessionId::generate();
        if !dispatcher.sessions().contains(&candidate) {
            break candidate;
        }
    };

    let (read_half, write_half) = stream.into_split();
    let session = Session::spawn(
        id.clone(),
        Role::Server,
        peer_addr,
        write_half,
        settings.queue_capacity,
    );
    if let Err(e) = session.try_enqueue(Frame::Handshake(id.clone())) {
        warn!("dropping connection from {peer_addr}: {e}");
        session.close();
        return;
    }
    session.open();
    dispatcher.register(Arc::clone(&session));
    info!(session = %id, "accepted connection from {peer_addr}");

    tokio::spawn(Arc::clone(dispatcher).run_read_loop(
        session,
        FrameReader::new(read_half),
        shutdown,
    ));
}

/// Connects to a server and completes the handshake.
///
/// Returns the open session and the handle of its read loop.
///
/// # Errors
///
/// Returns [`StartError`] if the address cannot be resolved, the connection
/// fails or times out, or the first frame is not a valid handshake.
pub async fn connect(
    host: &str,
    port: u16,
    dispatcher: &Arc<Dispatcher>,
    settings: ListenerSettings,
    shutdown: watch::Receiver<bool>,
) -> Result<(Arc<Session>, JoinHandle<()>), StartError> {
    let target = format!("{host}:{port}");
    let addr = tokio::net::lookup_host((host, port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| StartError::InvalidAddress(host.to_string()))?;

    let stream = match timeout(settings.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(StartError::ConnectFailed { addr: target, source }),
        Err(_) => {
            return Err(StartError::ConnectTimeout {
                addr: target,
                timeout: settings.connect_timeout,
            })
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {addr}: {e}");
    }

    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);

    let id = match timeout(settings.handshake_timeout, reader.next_frame()).await {
        Ok(Ok(Some(Frame::Handshake(id)))) => id,
        Ok(Ok(Some(other))) => {
            return Err(StartError::Handshake {
                addr,
                reason: format!("expected a handshake, got a {:?} frame", other.kind()),
            })
        }
        Ok(Ok(None)) => {
            return Err(StartError::Handshake {
                addr,
                reason: "connection closed before the handshake".to_string(),
            })
        }
        Ok(Err(e)) => {
            return Err(StartError::Handshake {
                addr,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(StartError::HandshakeTimeout {
                addr,
                timeout: settings.handshake_timeout,
            })
        }
    };

    let session = Session::spawn(id.clone(), Role::Client, addr, write_half, settings.queue_capacity);
    session.open();
    dispatcher.register(Arc::clone(&session));
    info!(session = %id, "connected to {addr}");

    let read_loop = tokio::spawn(Arc::clone(dispatcher).run_read_loop(
        Arc::clone(&session),
        reader,
        shutdown,
    ));
    Ok((session, read_loop))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

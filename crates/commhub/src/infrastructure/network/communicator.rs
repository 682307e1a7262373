//! Communicator: the public face of one hub instance.
//!
//! A `Communicator` is created for one [`Role`] and owns everything that
//! role needs: the [`ModuleRegistry`], the [`Dispatcher`] with its
//! [`SessionRegistry`](super::session_registry::SessionRegistry), the
//! hub-wide shutdown signal, and the handles of its background tasks.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use commhub::{Communicator, CommunicatorConfig, DataHandler, Priority};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Communicator::server(CommunicatorConfig::default())?;
//! server.subscribe(
//!     "chat",
//!     Arc::new(DataHandler::new(|text: &str| println!("chat: {text}"))),
//!     Priority::Normal,
//! );
//! let endpoint = server.start(None, Some("5000")).await?;
//! println!("listening on {endpoint}");
//! server.send("hello everyone", "chat", None)?;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use commhub_core::{protocol::frame::MAX_PAYLOAD_LEN, Role, SessionId, SessionInfo};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bulk_transfer::{self, FileTransferError, TransferSummary, DEFAULT_CHUNK_SIZE};
use super::dispatcher::{Dispatcher, SendError};
use super::listener::{self, ListenerSettings, StartError};
use crate::application::module_registry::{ModuleRegistry, NotificationHandler, Priority};
use crate::infrastructure::storage::config::{ConfigError, HubConfig};
use crate::infrastructure::storage::file_store::FileStore;

/// Runtime settings of a [`Communicator`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicatorConfig {
    /// Address a server binds.
    pub bind_address: IpAddr,
    /// Server port used when `start` is not given one.  `0` picks a free port.
    pub port: u16,
    /// Capacity of each session's outbound queue.
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Payload bytes per `Bulk` frame when sending files.
    pub chunk_size: usize,
    /// Folder for received files.  Without one, inbound bulk data is dropped.
    pub storage_dir: Option<PathBuf>,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
            queue_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            chunk_size: DEFAULT_CHUNK_SIZE,
            storage_dir: None,
        }
    }
}

impl CommunicatorConfig {
    /// Builds runtime settings from the on-disk configuration.
    ///
    /// Out-of-range values are clamped: the queue holds at least one frame,
    /// timeouts are at least one second, and the chunk size fits in a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] for a bad bind address.
    pub fn from_hub_config(config: &HubConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: config.network.bind_ip()?,
            port: config.network.port,
            queue_capacity: config.network.outbound_queue_capacity.max(1),
            connect_timeout: Duration::from_secs(config.network.connect_timeout_secs.max(1)),
            handshake_timeout: Duration::from_secs(config.network.handshake_timeout_secs.max(1)),
            chunk_size: config.transfer.chunk_size.clamp(1, MAX_PAYLOAD_LEN),
            storage_dir: config.transfer.storage_dir.clone(),
        })
    }

    fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            queue_capacity: self.queue_capacity.max(1),
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

struct Running {
    endpoint: String,
    tasks: Vec<JoinHandle<()>>,
}

/// One hub instance, either a server or a client.
pub struct Communicator {
    config: CommunicatorConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Sender<bool>,
    running: Mutex<Option<Running>>,
}

impl Communicator {
    /// Creates a server hub.  Opens the storage folder when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Storage`] if the storage folder cannot be created.
    pub fn server(config: CommunicatorConfig) -> Result<Self, StartError> {
        let store = match &config.storage_dir {
            Some(dir) => Some(Arc::new(FileStore::open(dir)?)),
            None => None,
        };
        Ok(Self::new(Role::Server, config, store))
    }

    /// Creates a client hub.
    ///
    /// A client only receives files if a storage folder is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Storage`] if the storage folder cannot be created.
    pub fn client(config: CommunicatorConfig) -> Result<Self, StartError> {
        let store = match &config.storage_dir {
            Some(dir) => Some(Arc::new(FileStore::open(dir)?)),
            None => None,
        };
        Ok(Self::new(Role::Client, config, store))
    }

    fn new(role: Role, config: CommunicatorConfig, store: Option<Arc<FileStore>>) -> Self {
        let modules = Arc::new(ModuleRegistry::new());
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(role, modules, store)),
            shutdown,
            running: Mutex::new(None),
        }
    }

    /// Starts the hub and returns the `ip:port` endpoint.
    ///
    /// A server binds `server_port` (or the configured port) and returns as
    /// soon as the accept loop is running; `server_ip` is ignored.  A client
    /// needs both arguments, connects, and returns once the handshake is
    /// done.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] for invalid arguments, socket failures, a
    /// failed handshake, or a hub that is already running.
    pub async fn start(
        &self,
        server_ip: Option<&str>,
        server_port: Option<&str>,
    ) -> Result<String, StartError> {
        let mut running = self.running.lock().await;
        // A client whose server went away has no live task left and may start again.
        if running
            .as_ref()
            .is_some_and(|r| r.tasks.iter().any(|t| !t.is_finished()))
        {
            return Err(StartError::AlreadyRunning);
        }
        self.shutdown.send_replace(false);
        let settings = self.config.listener_settings();

        let started = match self.role() {
            Role::Server => {
                let port = match server_port {
                    Some(raw) => listener::parse_port(raw)?,
                    None => self.config.port,
                };
                let socket = listener::bind(self.config.bind_address, port).await?;
                let local = socket.local_addr().map_err(|source| StartError::BindFailed {
                    addr: std::net::SocketAddr::new(self.config.bind_address, port),
                    source,
                })?;
                let endpoint = listener::advertised_endpoint(local);
                let accept = tokio::spawn(listener::accept_loop(
                    socket,
                    Arc::clone(&self.dispatcher),
                    settings,
                    self.shutdown.subscribe(),
                ));
                info!("server ready at {endpoint}");
                Running {
                    endpoint,
                    tasks: vec![accept],
                }
            }
            Role::Client => {
                let (Some(host), Some(raw_port)) = (server_ip, server_port) else {
                    return Err(StartError::MissingPeer);
                };
                let port = listener::parse_port(raw_port)?;
                let (session, read_loop) = listener::connect(
                    host.trim(),
                    port,
                    &self.dispatcher,
                    settings,
                    self.shutdown.subscribe(),
                )
                .await?;
                Running {
                    endpoint: session.peer_addr().to_string(),
                    tasks: vec![read_loop],
                }
            }
        };

        let endpoint = started.endpoint.clone();
        *running = Some(started);
        Ok(endpoint)
    }

    /// Stops the hub: closes every session, stops accepting, and waits for
    /// the background tasks.  Calling it again, or before `start`, is a
    /// no-op.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            debug!("stop called on a hub that is not running");
            return;
        };
        self.close_all_sessions().await;
        self.shutdown.send_replace(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {e}");
            }
        }
        // Connections accepted while the first pass ran.
        self.close_all_sessions().await;
        info!(endpoint = %running.endpoint, "hub stopped");
    }

    async fn close_all_sessions(&self) {
        for session in self.dispatcher.unregister_all() {
            session.close_and_wait().await;
        }
    }

    /// Returns the endpoint reported by `start` while the hub is running.
    pub async fn endpoint(&self) -> Option<String> {
        self.running.lock().await.as_ref().map(|r| r.endpoint.clone())
    }

    /// Sends a data message for `module`.  See [`Dispatcher::send`].
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] as described on [`Dispatcher::send`].
    pub fn send(
        &self,
        payload: &str,
        module: &str,
        destination: Option<&SessionId>,
    ) -> Result<(), SendError> {
        self.dispatcher.send(payload, module, destination)
    }

    /// Subscribes a module.  Returns `false` if `name` is already taken.
    pub fn subscribe(
        &self,
        name: &str,
        handler: Arc<dyn NotificationHandler>,
        priority: Priority,
    ) -> bool {
        self.dispatcher.modules().subscribe(name, handler, priority)
    }

    /// Sends every regular file in `folder` and waits until it is written.
    ///
    /// A client sends to its server and ignores `destination`; a server must
    /// name the receiving session.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError`] if there is no target session, the
    /// folder cannot be listed, or the session closes.
    pub async fn send_files(
        &self,
        folder: &Path,
        destination: Option<&SessionId>,
    ) -> Result<TransferSummary, FileTransferError> {
        let session = match self.role() {
            Role::Client => self
                .dispatcher
                .upstream()
                .ok_or(FileTransferError::NotConnected)?,
            Role::Server => {
                let id = destination.ok_or(FileTransferError::MissingDestination)?;
                self.dispatcher
                    .session(id)
                    .ok_or_else(|| FileTransferError::UnknownDestination(id.clone()))?
            }
        };

        let summary = bulk_transfer::send_folder(&session, folder, self.config.chunk_size).await?;
        info!(
            files = summary.files_sent,
            bytes = summary.bytes_sent,
            failed = summary.files_failed,
            "folder sent"
        );
        Ok(summary)
    }

    /// The server-assigned id of a connected client; `None` for a server.
    pub fn session_id(&self) -> Option<SessionId> {
        self.dispatcher.upstream().map(|s| s.id().clone())
    }

    /// Every live session.
    pub fn connected_sessions(&self) -> Vec<SessionInfo> {
        self.dispatcher
            .live_sessions()
            .iter()
            .map(|s| s.info())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.dispatcher.live_sessions().len()
    }

    pub fn role(&self) -> Role {
        self.dispatcher.role()
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        self.dispatcher.modules()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        // Background tasks watch this signal and wind down on their own.
        self.shutdown.send_replace(true);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! commhub library entry point.
//!
//! A small TCP communication hub.  One process runs as a **server** that
//! accepts many clients; other processes run as **clients** with a single
//! upstream connection.  Local modules subscribe by name and share that
//! connection for two kinds of traffic:
//!
//! - short text messages, unicast to one session or broadcast to all, and
//! - bulk file transfers that stream whole folders into the server's storage.
//!
//! Re-exports the public API so that integration tests in `tests/` and the
//! binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::module_registry::{DataHandler, ModuleRegistry, NotificationHandler, Priority};
pub use commhub_core::{Role, SessionId, SessionInfo};
pub use infrastructure::network::bulk_transfer::{FileTransferError, TransferSummary};
pub use infrastructure::network::communicator::{Communicator, CommunicatorConfig};
pub use infrastructure::network::dispatcher::SendError;
pub use infrastructure::network::listener::StartError;
pub use infrastructure::network::session::{SessionError, SessionState};
pub use infrastructure::storage::config::{ConfigError, HubConfig};

//! Domain types shared by the server and client roles.
//!
//! Nothing in here touches the network or the file system.  The hub crate
//! builds its sessions and storage on top of these types.

/// Sanitization of file names received from peers.
pub mod file_name;

/// Session identifiers, roles, and the handle passed to join notifications.
pub mod session;

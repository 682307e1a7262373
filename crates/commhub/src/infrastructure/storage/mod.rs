//! Storage infrastructure: configuration and received files.
//!
//! - **`config`** – Reads and writes the optional TOML configuration file,
//!   falling back to defaults when it does not exist.
//! - **`file_store`** – The server's storage folder.  Turns a file name
//!   announced by a peer into a safe path inside that folder.

pub mod config;
pub mod file_store;

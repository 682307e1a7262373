//! Network infrastructure: sessions, routing, and bulk transfer over TCP.
//!
//! # Sub-modules
//!
//! - **`session`** – One TCP connection with its bounded outbound queue and
//!   the writer task that drains it.  The only code that writes to a socket.
//!
//! - **`frame_io`** – Reassembles frames from the read half of a socket,
//!   however the bytes were split by TCP.
//!
//! - **`session_registry`** – The live sessions of a server, keyed by the id
//!   handed out in the handshake.
//!
//! - **`dispatcher`** – Routes outbound messages (unicast, broadcast, or
//!   upstream) and runs the per-session read loop that feeds modules.
//!
//! - **`bulk_transfer`** – Streams files as `Bulk` frames and writes incoming
//!   ones into the storage folder.
//!
//! - **`listener`** – Server accept loop and client connect, both ending in
//!   the id handshake.
//!
//! - **`communicator`** – The public API tying the pieces above together.

pub mod bulk_transfer;
pub mod communicator;
pub mod dispatcher;
pub mod frame_io;
pub mod listener;
pub mod session;
pub mod session_registry;

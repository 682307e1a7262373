//! # commhub-core
//!
//! Shared library for commhub containing the wire protocol, the bulk
//! file-transfer codec, and the small set of domain types both hub roles
//! agree on.
//!
//! This crate has no dependency on sockets or an async runtime.  Everything
//! here works on byte slices so it can be unit-tested (and benchmarked) in
//! isolation; the `commhub` crate drives it from tokio tasks.
//!
//! # Architecture overview
//!
//! - **`protocol`** – How bytes travel over one TCP connection.  Every unit on
//!   the wire is an 8-byte header (version, kind, length) followed by a
//!   payload.  The `kind` tag separates control text from bulk-transfer
//!   segments so the two can share a stream without being confused.
//!
//! - **`domain`** – Session identifiers, hub roles, and file-name
//!   sanitization for files received from untrusted peers.

pub mod domain;
pub mod protocol;

pub use domain::file_name::sanitize_file_name;
pub use domain::session::{InvalidSessionId, Role, SessionId, SessionInfo};
pub use protocol::bulk::{BulkDecoder, BulkEvent, BulkTransferHeader, TransferError};
pub use protocol::frame::{decode_frame, encode_frame, Frame, FrameKind, ProtocolError};

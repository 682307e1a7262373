//! Session identity types.
//!
//! # Why not a counter? (for beginners)
//!
//! Session ids are the addressing keys used by `send(.., destination)`.  A
//! predictable sequence (`0`, `1`, `2`, ...) lets any peer guess another
//! peer's id.  Ids are therefore random v4 UUIDs rendered without hyphens,
//! which are both unguessable and unique for the lifetime of a hub.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted length of a session id received in a handshake.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Why a string was rejected as a [`SessionId`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidSessionId {
    #[error("session id is empty")]
    Empty,
    #[error("session id is {len} bytes, limit is {MAX_SESSION_ID_LEN}")]
    TooLong { len: usize },
    #[error("session id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Opaque identifier of one connected peer, assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh, collision-resistant id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    /// Validates an id received from the wire.
    ///
    /// Accepts 1–64 characters drawn from ASCII letters, digits, `-` and `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidSessionId::Empty);
        }
        if s.len() > MAX_SESSION_ID_LEN {
            return Err(InvalidSessionId::TooLong { len: s.len() });
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(InvalidSessionId::InvalidCharacter(c));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which end of the connection this hub instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts many peers and assigns their ids.
    Server,
    /// Holds exactly one upstream connection to a server.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Read-only handle describing a session, handed to join notifications.
///
/// Modules keep the `id` to address later unicast sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub role: Role,
    pub peer_addr: SocketAddr,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! SessionRegistry: the live sessions a server currently serves.
//!
//! A plain `HashMap` behind a `std::sync::RwLock`.  Sends take a read lock
//! for a lookup or a snapshot and release it before any I/O, so lock hold
//! times stay in the microsecond range and the lock never crosses an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use commhub_core::SessionId;
use tracing::debug;

use super::session::Session;

/// Concurrent map from [`SessionId`] to live [`Session`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session`, returning the session it replaced, if any.
    ///
    /// Ids are generated by the server, so a replacement only happens when a
    /// caller reuses an id on purpose.  The caller decides what to do with
    /// the returned session.
    pub fn add(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let id = session.id().clone();
        let previous = self.write().insert(id.clone(), session);
        debug!(session = %id, replaced = previous.is_some(), "session registered");
        previous
    }

    /// Removes the session for `id` and begins closing it.
    ///
    /// Only one of several concurrent callers receives `Some`.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.write().remove(id)?;
        removed.close();
        debug!(session = %id, "session unregistered");
        Some(removed)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.read().contains_key(id)
    }

    /// Returns every session at the moment of the call.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        self.write().drain().map(|(_, s)| s).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

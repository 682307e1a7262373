//! ModuleRegistry: the local modules that share the hub's connection.
//!
//! Every feature that wants network traffic (whiteboard, screen share,
//! updater, ...) subscribes once under a unique name with a
//! [`NotificationHandler`].  The hub then fans three kinds of events out to
//! every subscriber:
//!
//! - `on_data` – a control frame arrived from a peer.
//! - `on_client_joined` – a session finished its handshake and is registered.
//! - `on_client_left` – a session was removed from the registry.
//!
//! # Priority
//!
//! Subscriptions carry a [`Priority`].  For a single event, every `High`
//! handler runs before any `Normal` handler; within a tier, handlers run in
//! the order they subscribed.  The list is kept sorted on insertion so the
//! hot fan-out path is a plain iteration.
//!
//! # Locking
//!
//! Fan-out clones the handler list under a read lock and calls the handlers
//! after releasing it, so a handler may itself call `subscribe` without
//! deadlocking.

use std::sync::{Arc, PoisonError, RwLock};

use commhub_core::{SessionId, SessionInfo};
use tracing::{debug, info};

/// Dispatch priority of a subscribed module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
}

/// Capability set a module provides to receive hub events.
///
/// All three methods are required.  Modules that only care about data can
/// wrap a closure in [`DataHandler`], which states the "ignore join/leave"
/// choice explicitly instead of hiding it in a default body.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationHandler: Send + Sync {
    /// Called with the text of every inbound data frame.
    fn on_data(&self, serialized_data: &str);

    /// Called after a session has been registered.
    fn on_client_joined(&self, session: &SessionInfo);

    /// Called once after a session has been removed.
    fn on_client_left(&self, session_id: &SessionId);
}

/// Adapter for modules that consume data frames only.
pub struct DataHandler<F> {
    on_data: F,
}

impl<F> DataHandler<F>
where
    F: Fn(&str) + Send + Sync,
{
    pub fn new(on_data: F) -> Self {
        Self { on_data }
    }
}

impl<F> NotificationHandler for DataHandler<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn on_data(&self, serialized_data: &str) {
        (self.on_data)(serialized_data);
    }

    fn on_client_joined(&self, _session: &SessionInfo) {}

    fn on_client_left(&self, _session_id: &SessionId) {}
}

struct Subscription {
    name: String,
    priority: Priority,
    handler: Arc<dyn NotificationHandler>,
}

/// Concurrent registry of subscribed modules.
#[derive(Default)]
pub struct ModuleRegistry {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` under `name`.
    ///
    /// Returns `true` if the module was newly registered.  The first
    /// subscription for a name wins; later calls leave it untouched and
    /// return `false`.
    pub fn subscribe(
        &self,
        name: &str,
        handler: Arc<dyn NotificationHandler>,
        priority: Priority,
    ) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if subs.iter().any(|s| s.name == name) {
            debug!(module = name, "module is already subscribed");
            return false;
        }

        // Insert after the last subscription of the same or higher priority.
        let position = subs
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(subs.len());
        subs.insert(
            position,
            Subscription {
                name: name.to_string(),
                priority,
                handler,
            },
        );
        info!(module = name, ?priority, "module subscribed");
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns the subscribed module names in dispatch order.
    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|s| s.name.clone()).collect()
    }

    /// Returns the handlers in dispatch order: `High` first, then `Normal`,
    /// each tier in registration order.
    pub fn handlers_by_priority(&self) -> Vec<Arc<dyn NotificationHandler>> {
        self.read().iter().map(|s| Arc::clone(&s.handler)).collect()
    }

    /// Delivers an inbound data frame to every handler.
    pub fn notify_data(&self, serialized_data: &str) {
        for handler in self.handlers_by_priority() {
            handler.on_data(serialized_data);
        }
    }

    pub fn notify_joined(&self, session: &SessionInfo) {
        for handler in self.handlers_by_priority() {
            handler.on_client_joined(session);
        }
    }

    pub fn notify_left(&self, session_id: &SessionId) {
        for handler in self.handlers_by_priority() {
            handler.on_client_left(session_id);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

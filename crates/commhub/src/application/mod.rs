//! Application layer of the hub.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules and data types in `commhub_core`) and the infrastructure
//! (sockets, tasks, files).
//!
//! Code in this layer:
//!
//! - **Describes** what the hub offers to the rest of the program, as
//!   traits and plain data structures.
//! - **Contains no network I/O and no file system access**, so it can be
//!   unit-tested with mocks.
//!
//! # Sub-modules
//!
//! - **`module_registry`** – The modules that share the hub's connection,
//!   the [`NotificationHandler`](module_registry::NotificationHandler)
//!   capability they implement, and priority-ordered event fan-out.

pub mod module_registry;

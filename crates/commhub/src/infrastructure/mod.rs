//! Infrastructure layer of the hub.
//!
//! Contains the OS-facing adapters: TCP sockets and the tasks that drive
//! them, the storage folder for received files, and the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `commhub_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;

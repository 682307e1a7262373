//! FileStore: where received files land on disk.
//!
//! Every received file is stored directly inside the storage root as
//! `<session_id>_<sanitized file name>`.  The session prefix keeps two
//! clients that send a file with the same name from overwriting each other.
//! Names are sanitized with [`sanitize_file_name`] and the final path is
//! checked to sit directly inside the root before anything is created.

use std::path::{Path, PathBuf};

use commhub_core::{sanitize_file_name, SessionId};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the receive-side file store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to write outside the storage folder: {path}")]
    OutsideRoot { path: PathBuf },
}

/// Storage folder for files received by a server.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens `root`, creating it (and its parents) when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the folder cannot be created or
    /// exists but is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        info!("storage folder ready at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path a file named `file_name` from `session` is stored at.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutsideRoot`] if the sanitized name would not
    /// resolve to a direct child of the root.
    pub fn destination(&self, session: &SessionId, file_name: &str) -> Result<PathBuf, StorageError> {
        let stored_name = sanitize_file_name(&format!("{session}_{file_name}"));
        let path = self.root.join(&stored_name);
        if path.parent() != Some(self.root.as_path()) || path.file_name().is_none() {
            return Err(StorageError::OutsideRoot { path });
        }
        Ok(path)
    }

    /// Creates (or truncates) the destination file for an incoming transfer.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the path is rejected or cannot be opened.
    pub async fn create(
        &self,
        session: &SessionId,
        file_name: &str,
    ) -> Result<(PathBuf, tokio::fs::File), StorageError> {
        let path = self.destination(session, file_name)?;
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        debug!("receiving into {}", path.display());
        Ok((path, file))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

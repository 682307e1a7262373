//! TOML-based configuration for the hub.
//!
//! The file is optional.  When `--config <path>` (or `COMMHUB_CONFIG`) names
//! a file that does not exist, every setting takes its default, and command
//! line arguments override the values that matter per run (port, folders).
//!
//! # What is TOML? (for beginners)
//!
//! TOML (Tom's Obvious Minimal Language) is a configuration file format designed
//! to be easy to read and write.  It looks similar to INI files but with more
//! data types.  Example:
//!
//! ```toml
//! [network]
//! port = 5000
//! bind_address = "0.0.0.0"
//! outbound_queue_capacity = 256
//!
//! [transfer]
//! chunk_size = 4096
//!
//! [logging]
//! log_level = "debug"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  A file that
//! only sets `[network] port` is therefore complete.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `bind_address` is not an IP address.
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level hub configuration stored on disk.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HubConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Socket and session settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Server port used when none is given on the command line.
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address the server binds.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Seconds a client waits for the TCP connection.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds a client waits for the server's handshake frame.
    #[serde(default = "default_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Frames each session can hold before sends report a full queue.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Bulk transfer settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TransferConfig {
    /// Payload bytes per `Bulk` frame.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Folder for received files.  The `server` subcommand overrides it.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    5000
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    256
}
fn default_chunk_size() -> usize {
    4096
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            connect_timeout_secs: default_timeout_secs(),
            handshake_timeout_secs: default_timeout_secs(),
            outbound_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            storage_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl NetworkConfig {
    /// Parses `bind_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if it is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `HubConfig` from `path`, returning `HubConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<HubConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HubConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── HubConfig defaults ────────────────────────────────────────────────────

    #[test]
    fn test_hub_config_default_values() {
        // Arrange / Act
        let cfg = HubConfig::default();

        // Assert
        assert_eq!(cfg.network.port, 5000);
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
        assert_eq!(cfg.network.outbound_queue_capacity, 256);
        assert_eq!(cfg.transfer.chunk_size, 4096);
        assert_eq!(cfg.transfer.storage_dir, None);
        assert_eq!(cfg.logging.log_level, "info");
    }

    #[test]
    fn test_bind_ip_parses_default_and_rejects_garbage() {
        let mut net = NetworkConfig::default();
        assert!(net.bind_ip().unwrap().is_unspecified());

        net.bind_address = "not-an-ip".to_string();
        assert!(matches!(net.bind_ip(), Err(ConfigError::InvalidBindAddress(_))));
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: HubConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, HubConfig::default());
    }

    #[test]
    fn test_partial_network_section_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[network]
port = 9999
"#;

        // Act
        let cfg: HubConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.port, 9999);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.network.connect_timeout_secs, 10);
        assert_eq!(cfg.transfer.chunk_size, 4096);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("commhub.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));
    }

    // ── load_config ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = load_config(&tmp.path().join("missing.toml")).unwrap();
        assert_eq!(cfg, HubConfig::default());
    }

    #[test]
    fn test_load_config_reads_every_section() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("commhub.toml");
        std::fs::write(
            &path,
            r#"
[network]
port = 12345
outbound_queue_capacity = 64

[transfer]
chunk_size = 8192
storage_dir = "/srv/inbox"

[logging]
log_level = "debug"
"#,
        )
        .unwrap();

        // Act
        let cfg = load_config(&path).unwrap();

        // Assert
        assert_eq!(cfg.network.port, 12345);
        assert_eq!(cfg.network.outbound_queue_capacity, 64);
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
        assert_eq!(cfg.transfer.chunk_size, 8192);
        assert_eq!(cfg.transfer.storage_dir, Some(PathBuf::from("/srv/inbox")));
        assert_eq!(cfg.logging.log_level, "debug");
    }

    #[test]
    fn test_load_config_on_directory_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Io { .. })));
    }
}

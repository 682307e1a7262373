//! commhub command-line entry point.
//!
//! # Usage
//!
//! ```text
//! commhub [--config <PATH>] server <PORT> <STORAGE_FOLDER>
//! commhub [--config <PATH>] client <SERVER_IP> <PORT> <SOURCE_FOLDER>
//! ```
//!
//! - `server` binds `PORT`, prints the `ip:port` clients should use, stores
//!   every received file in `STORAGE_FOLDER`, and runs until Ctrl-C or ENTER.
//! - `client` connects to the server, sends every regular file in
//!   `SOURCE_FOLDER`, and disconnects.
//!
//! Invalid arguments print usage and exit with code 2 before any socket is
//! opened.  A failure to start exits with code 1.
//!
//! # Environment variable overrides
//!
//! | Variable         | Description                                     |
//! |------------------|-------------------------------------------------|
//! | `COMMHUB_CONFIG` | Path of the TOML configuration file             |
//! | `RUST_LOG`       | `tracing` filter; overrides `[logging] log_level` |

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use commhub::infrastructure::storage::config::load_config;
use commhub::{
    Communicator, CommunicatorConfig, HubConfig, NotificationHandler, Priority, SessionId,
    SessionInfo,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TCP communication hub with bulk file transfer.
#[derive(Debug, Parser)]
#[command(name = "commhub", version)]
struct Cli {
    /// Optional TOML configuration file.  Missing files mean defaults.
    #[arg(long, global = true, env = "COMMHUB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Accept clients and store the files they send.
    Server {
        /// TCP port to listen on (1-65535).
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
        /// Folder for received files; created when missing.
        storage_folder: PathBuf,
    },
    /// Connect to a server and send every file in a folder.
    Client {
        /// Server IP address or host name.
        server_ip: String,
        /// Server TCP port (1-65535).
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
        /// Folder whose regular files are sent.
        #[arg(value_parser = existing_dir)]
        source_folder: PathBuf,
    },
}

fn existing_dir(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("{raw} is not a folder"))
    }
}

// ── Activity log module ───────────────────────────────────────────────────────

/// Module that logs every hub event.  The CLI has no other module.
struct ActivityLog;

impl NotificationHandler for ActivityLog {
    fn on_data(&self, serialized_data: &str) {
        info!(bytes = serialized_data.len(), "data received: {serialized_data}");
    }

    fn on_client_joined(&self, session: &SessionInfo) {
        info!(session = %session.id, peer = %session.peer_addr, "client joined");
    }

    fn on_client_left(&self, session_id: &SessionId) {
        info!(session = %session_id, "client left");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    // Exits with code 2 (and the usage text) on invalid arguments.
    let cli = Cli::parse();

    let hub_config = match cli.config.as_deref() {
        Some(path) => match load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("error: cannot load {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => HubConfig::default(),
    };

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&hub_config.logging.log_level)),
        )
        .init();

    match run(cli.mode, &hub_config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(mode: Mode, hub_config: &HubConfig) -> anyhow::Result<()> {
    let mut config =
        CommunicatorConfig::from_hub_config(hub_config).context("invalid configuration")?;

    match mode {
        Mode::Server {
            port,
            storage_folder,
        } => {
            config.storage_dir = Some(storage_folder);
            run_server(config, port).await
        }
        Mode::Client {
            server_ip,
            port,
            source_folder,
        } => run_client(config, &server_ip, port, &source_folder).await,
    }
}

async fn run_server(config: CommunicatorConfig, port: u16) -> anyhow::Result<()> {
    let hub = Communicator::server(config).context("failed to prepare the server")?;
    hub.subscribe("activity-log", Arc::new(ActivityLog), Priority::Normal);

    let endpoint = hub
        .start(None, Some(&port.to_string()))
        .await
        .context("failed to start the server")?;
    println!("{endpoint}");
    info!("server running on {endpoint}; press ENTER or Ctrl-C to stop");

    let enter = wait_for_enter();
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            info!("Ctrl-C received");
        }
        _ = enter => info!("ENTER pressed"),
    }

    hub.stop().await;
    Ok(())
}

async fn run_client(
    config: CommunicatorConfig,
    server_ip: &str,
    port: u16,
    source_folder: &Path,
) -> anyhow::Result<()> {
    let hub = Communicator::client(config).context("failed to prepare the client")?;
    hub.subscribe("activity-log", Arc::new(ActivityLog), Priority::Normal);

    let endpoint = hub
        .start(Some(server_ip), Some(&port.to_string()))
        .await
        .with_context(|| format!("failed to connect to {server_ip}:{port}"))?;
    info!(
        session = %hub.session_id().map(|id| id.to_string()).unwrap_or_default(),
        "connected to {endpoint}"
    );

    let result = hub
        .send_files(source_folder, None)
        .await
        .with_context(|| format!("failed to send {}", source_folder.display()));
    hub.stop().await;

    let summary = result?;
    println!(
        "sent {} file(s), {} byte(s); {} failed",
        summary.files_sent, summary.bytes_sent, summary.files_failed
    );
    Ok(())
}

/// Resolves when a line is read from stdin.  Never resolves when stdin is
/// closed, so a detached server keeps running until Ctrl-C.
async fn wait_for_enter() {
    let (tx, rx) = oneshot::channel();
    // Not `tokio::io::stdin`: its blocking read holds up runtime shutdown.
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            let _ = tx.send(());
        }
    });
    if rx.await.is_err() {
        std::future::pending::<()>().await;
    }
}

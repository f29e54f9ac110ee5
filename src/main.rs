//! # topicast
//!
//! Topic-based WebSocket broadcaster binary: loads settings, initializes
//! logging and metrics, and runs the server until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use topicast_server::config::ServerConfig;
use topicast_server::server::TopicastServer;
use topicast_settings::{LoggingSettings, TopicastSettings};
use tracing_subscriber::EnvFilter;

/// Topic-based WebSocket broadcaster.
#[derive(Parser, Debug)]
#[command(name = "topicast", about = "Topic-based WebSocket broadcaster")]
struct Cli {
    /// Settings file (defaults to `~/.topicast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn load_settings(&self) -> Result<TopicastSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(topicast_settings::settings_path);
        let mut settings = topicast_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_tracing(&settings.logging);

    let metrics = topicast_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = Arc::new(TopicastServer::new(
        ServerConfig::from(&settings),
        Some(metrics),
    ));
    let (addr, mut handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("topicast listening on http://{addr} (ws://{addr}/ws)");

    tokio::select! {
        res = shutdown_signal() => res?,
        res = &mut handle => {
            res.context("Server task panicked")?.context("Server error")?;
            return Ok(());
        }
    }

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    handle
        .await
        .context("Server task panicked")?
        .context("Server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

//! # mxws-proxy
//!
//! Matrix websockets proxy binary: loads settings, wires the homeserver
//! client and command registry into the server, and serves until SIGINT or
//! SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mxws_core::constants::VERSION;
use mxws_rpc::MethodRegistry;
use mxws_server::{MxwsServer, ServerConfig, shutdown_signal};
use mxws_settings::MxwsSettings;
use mxws_upstream::Homeserver;

/// How long to wait for open streams to wind down on exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Matrix websockets proxy.
#[derive(Parser, Debug)]
#[command(name = "mxws-proxy", version, about = "Matrix client-server API over websockets")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Homeserver base URL (overrides settings).
    #[arg(long)]
    upstream: Option<String>,

    /// Settings file (default `~/.mxws/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Defaults, then the settings file, then `MXWS_*`, then flags.
fn resolve_settings(cli: &Cli) -> Result<MxwsSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(mxws_settings::settings_path);
    let mut settings = mxws_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(upstream) = &cli.upstream {
        settings.upstream.base_url.clone_from(upstream);
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    mxws_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics = mxws_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let homeserver = Homeserver::new(
        &settings.upstream.base_url,
        settings.upstream.request_timeout(),
    )
    .context("Invalid homeserver URL")?;
    let registry = MethodRegistry::with_defaults();
    let method_count = registry.methods().len();

    let server = MxwsServer::new(
        ServerConfig::from_settings(&settings),
        homeserver,
        registry,
        metrics,
    );
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        version = VERSION,
        upstream = %settings.upstream.base_url,
        "mxws proxy listening on http://{addr} ({method_count} commands registered)"
    );

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(Some(SHUTDOWN_TIMEOUT)).await;
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

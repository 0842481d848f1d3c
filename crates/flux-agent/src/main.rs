//! # flux-agent
//!
//! Flux server binary: loads settings, wires providers and the change
//! engine, and serves HTTP and WebSocket until interrupted.

#![deny(unsafe_code)]

mod wiring;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flux_server::{DEFAULT_DRAIN_TIMEOUT, FluxServer, ServerConfig, ServerDeps};
use flux_settings::FluxSettings;

/// Flux assistant server.
#[derive(Parser, Debug)]
#[command(name = "flux-agent", about = "Flux assistant server")]
struct Cli {
    /// Settings file (defaults to `~/.flux/settings.json`).
    #[arg(long, env = "FLUX_SETTINGS")]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Working tree for self-modification (overrides settings).
    #[arg(long)]
    repo_path: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut FluxSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.repo_path {
            settings.selfmod.repo_path.clone_from(path);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(flux_settings::settings_path);
    let mut settings = flux_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    flux_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics = match flux_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };

    let providers = wiring::build_providers(&settings.providers);
    let selfmod = wiring::build_selfmod(&settings).await;

    let server = FluxServer::new(
        ServerConfig::from(&settings.server),
        ServerDeps {
            providers,
            default_provider: settings.providers.default_provider.clone(),
            engine: selfmod.engine,
            publish_target: selfmod.target,
            metrics,
        },
    );

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!("Flux listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .drain(handle, DEFAULT_DRAIN_TIMEOUT)
        .await;
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}

//! Fleet coordination daemon.
//!
//! Registers remote agents, queues operator-issued commands per agent,
//! serves them back one at a time on poll, and collects execution reports
//! (including screenshot artifacts) into durable storage.

mod http;
mod identity;
mod journal;
mod settings;
mod sink;
mod state;

use std::{env, io, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SECRET: &str = "change-me-in-production";

#[derive(Parser, Debug)]
#[command(name = "fleetd", version = DAEMON_VERSION)]
#[command(about = "Fleet coordination daemon")]
struct Cli {
    /// Path to fleetd configuration (fleetd.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host binding (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port binding (overrides config and PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for registrations, reports and artifacts
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Journal HMAC key (or use FLEETD_SECRET env var)
    #[arg(long)]
    secret: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    info!(
        "{}",
        fleet_build_info::formatted_banner("fleetd", DAEMON_VERSION)
    );

    let secret = cli
        .secret
        .or_else(|| env::var("FLEETD_SECRET").ok())
        .unwrap_or_else(|| DEFAULT_SECRET.to_string());

    if secret == DEFAULT_SECRET {
        warn!("Using default secret - change FLEETD_SECRET in production!");
    }

    let config_path = cli
        .config
        .or_else(|| env::var("FLEETD_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let candidate = env::current_dir().ok()?.join("fleetd.toml");
            candidate.is_file().then_some(candidate)
        });

    let mut settings = settings::load_settings(config_path.as_deref());

    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    } else if let Ok(raw) = env::var("PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => settings.port = port,
            Err(err) => warn!("Invalid PORT value '{}': {}", raw, err),
        }
    }
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    let store = sink::Store::new(settings.data_dir.clone());
    store.ensure_layout().await?;

    let journal_path = settings.journal_path();
    let journal = journal::Journal::open(&journal_path, secret.as_bytes())
        .with_context(|| format!("Failed to open journal {}", journal_path.display()))?;

    let app = http::AppState::new(state::State::new(journal), store);
    let router = http::router(app);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", settings.host, settings.port))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("fleetd listening on {addr}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server encountered an unrecoverable error")?;

    info!("fleetd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        return;
    }
    info!("Shutdown requested");
}

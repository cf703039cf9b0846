//! parapara-server
//!
//! Coordination server for the collaborative 60-frame flipbook animation
//! game. One process, one data directory, configuration through environment
//! variables with a couple of CLI overrides.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parapara_server::{build_router, AppState, Config, Store};

/// Collaborative flipbook animation coordination server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to bind to (overrides the PORT environment variable)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory (overrides the DATA_DIR environment variable)
    #[arg(short, long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("parapara_server={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("parapara-server starting...");

    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!(data_dir = %config.data_dir.display(), "opening store...");
    let store = Arc::new(Store::open(config)?);
    parapara_server::store::spawn_background_tasks(store.clone());

    let state = AppState::new(store);
    let app = build_router(state);

    info!(addr = %bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
    }
}

//! cae-ml (Color Analysis worker) - Main entry point
//!
//! Consumes `new-work` from the shared broker, analyses each referenced image
//! and publishes `work-done`. Serves `/health` alongside.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cae_common::config::{resolve_root_folder, DataPaths, TomlConfig};
use cae_common::queue::QueueSettings;
use cae_common::telemetry::{default_filter, init_tracing};
use cae_common::{ResultStore, WorkQueue};
use cae_ml::worker::AnalysisWorker;
use cae_ml::{build_router, AppState};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Command-line arguments for cae-ml
#[derive(Parser, Debug)]
#[command(name = "cae-ml")]
#[command(about = "Color analysis worker for CAE")]
#[command(version)]
struct Args {
    /// Port for the health endpoint (overrides `worker_port` in the config file)
    #[arg(short, long, env = "CAE_ML_PORT")]
    port: Option<u16>,

    /// Root folder holding the store and broker databases
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Explicit config file
    #[arg(short, long, env = "CAE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match &args.config {
        Some(path) => TomlConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::load().context("Failed to load config")?,
    };

    init_tracing(&default_filter("cae_ml", &toml_config.logging), &toml_config.logging)
        .context("Failed to initialize logging")?;

    info!(
        "Starting CAE analysis worker (cae-ml) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let paths = DataPaths::resolve(root_folder, &toml_config);
    paths.ensure_root_exists()?;
    info!("Store: {}", paths.store.display());
    info!("Broker: {}", paths.broker.display());

    let store = ResultStore::open(&paths.store)
        .await
        .context("Failed to open result store")?
        .with_max_lock_wait_ms(toml_config.max_lock_wait_ms);

    // Blocks until the broker is reachable
    let queue = WorkQueue::connect(&paths.broker, QueueSettings::from(&toml_config.queue)).await;
    info!("✓ Connected to broker");

    let worker = AnalysisWorker::new(store, queue.clone());
    let state = AppState::new(worker.status(), queue);
    let app = build_router(state);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let port = args.port.unwrap_or(toml_config.worker_port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("cae-ml health check: http://{}/health", addr);

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("Health server error: {}", e);
            }
        }
    });

    let outcome = worker.run(shutdown.clone()).await;
    shutdown.cancel();
    let _ = server.await;

    outcome.context("Worker stopped with an error")?;
    info!("Worker shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

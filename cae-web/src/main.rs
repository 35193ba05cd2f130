//! cae-web (Color Analysis front end) - Main entry point
//!
//! Serves the capture page and API on port 5001 by default. Uploads are
//! stored, published to `new-work` and answered once the matching
//! `work-done` notice arrives from cae-ml.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cae_common::config::{resolve_root_folder, DataPaths, TomlConfig};
use cae_common::events::EventBus;
use cae_common::queue::QueueSettings;
use cae_common::telemetry::{default_filter, init_tracing};
use cae_common::{ResultStore, WorkQueue};
use cae_web::coordinator::RequestCoordinator;
use cae_web::{build_router, AppState};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Buffered events per SSE subscriber
const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for cae-web
#[derive(Parser, Debug)]
#[command(name = "cae-web")]
#[command(about = "Capture front end for CAE")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides `web_port` in the config file)
    #[arg(short, long, env = "CAE_WEB_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "CAE_WEB_HOST")]
    host: std::net::IpAddr,

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

    init_tracing(&default_filter("cae_web", &toml_config.logging), &toml_config.logging)
        .context("Failed to initialize logging")?;

    info!(
        "Starting CAE front end (cae-web) v{} [{}] built {} ({})",
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

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let coordinator = RequestCoordinator::new(store, queue.clone(), event_bus.clone());
    if let Err(e) = coordinator.restore_latest().await {
        warn!("Could not restore latest result: {}", e);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let listener_task = tokio::spawn({
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = coordinator.run_completion_listener(shutdown.clone()).await {
                error!("Completion listener stopped: {}", e);
                shutdown.cancel();
            }
        }
    });

    let result_timeout = Duration::from_secs(toml_config.result_timeout_secs);
    let state = AppState::new(coordinator, queue, event_bus, result_timeout);
    let app = build_router(state);

    let port = args.port.unwrap_or(toml_config.web_port);
    let addr = SocketAddr::new(args.host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("cae-web listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = listener_task.await;

    info!("Server shutdown complete");
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

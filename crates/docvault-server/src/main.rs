//! docvault — per-user document ingestion and semantic search server.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use docvault_core::DocVaultConfig;
use docvault_runtime::Services;
use docvault_server::{build_router, AppState};

fn resolve_data_dir() -> PathBuf {
    std::env::var("DOCVAULT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("volumes/docvault"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = DocVaultConfig::from_env(&data_dir)?;
    let port = config.port;

    // Blocking HTTP clients and SQLite handles are built off the async runtime.
    let services = tokio::task::spawn_blocking(move || Services::open(config)).await??;
    let state = Arc::new(AppState::new(services));

    let sweep = state.clone();
    match tokio::task::spawn_blocking(move || sweep.services.reconciler().run()).await? {
        Ok(report) if !report.errors.is_empty() => {
            warn!("Startup reconciliation finished with {} errors", report.errors.len())
        }
        Ok(_) => {}
        Err(e) => warn!("Startup reconciliation failed: {}", e),
    }

    let app = build_router(state.clone());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("docvault listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let closing = state.clone();
    tokio::task::spawn_blocking(move || closing.services.close()).await??;
    Ok(())
}

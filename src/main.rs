use anyhow::{Context, Result};
use dropbin::{
    config::AppConfig,
    routes::routes::routes,
    services::{metadata_store::open_store, registry::Registry, sweeper::EvictionSweeper},
    state::AppState,
};
use std::io::ErrorKind;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting dropbin with config: {:?}", cfg);

    // --- Open metadata store + registry ---
    let store = open_store(cfg.store_backend, &cfg.data_path)
        .await
        .with_context(|| format!("opening metadata store at {}", cfg.data_path.display()))?;
    let registry = Registry::open(cfg.registry.clone(), store)
        .await
        .with_context(|| {
            format!(
                "opening upload directory {}",
                cfg.registry.upload_dir.display()
            )
        })?;

    // --- Background eviction ---
    let sweeper = EvictionSweeper::start(registry.clone());

    // --- Build router ---
    let app = routes(AppState::new(registry, cfg.public_url.clone()));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let a sweep in progress finish before the process exits.
    sweeper.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

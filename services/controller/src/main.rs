//! fleetsplit controller
//!
//! Runs the scope registry, which in turn runs one deployment splitter and
//! one namespace propagator per bound scope, against the in-memory store.

use std::sync::Arc;

use anyhow::{Context, Result};
use fleetsplit_controller::{
    config,
    manager::Manager,
    store::{MemoryStore, Seed},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FLEETSPLIT_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fleetsplit controller");
    info!(
        workers = config.controller.workers,
        scopes = config.scopes.len(),
        "Configuration loaded"
    );

    let store = match &config.seed_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading seed file {}", path.display()))?;
            let seed: Seed = serde_json::from_str(&raw)
                .with_context(|| format!("parsing seed file {}", path.display()))?;
            info!(path = %path.display(), "Seeding in-memory store");
            MemoryStore::from_seed(seed).await
        }
        None => MemoryStore::new(),
    };
    let store = Arc::new(store);

    for scope in &config.scopes {
        store.bind_scope(scope).await;
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let manager = Manager::new(store, config.controller.clone());
    let manager_handle = tokio::spawn(async move {
        manager.run(shutdown_rx).await;
    });

    // Wait for shutdown signal (Ctrl+C)
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for controllers to shut down...");
    match tokio::time::timeout(config.shutdown_timeout, manager_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Manager task panicked"),
        Err(e) => warn!(error = %e, "Controllers did not shut down in time"),
    }

    info!("fleetsplit shutdown complete");
    Ok(())
}

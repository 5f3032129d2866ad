//! leftover controller binary.
//!
//! Runs the reconciliation worker against the in-memory store, seeded from
//! `LEFTOVER_SEED_FILE`, with capacity data served from
//! `LEFTOVER_SNAPSHOT_FILE`.

use std::sync::Arc;

use anyhow::Result;
use leftover_capacity::{Snapshot, SnapshotClientFactory};
use leftover_controller::{
    dev, Config, InMemoryStore, Reconciler, ReconcilerSettings, Worker, WorkerConfig,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to LEFTOVER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting leftover controller");
    info!(
        resync_interval_secs = config.resync_interval.as_secs(),
        pass_timeout_secs = config.pass_timeout.as_secs(),
        quote_window_minutes = config.quote_window.num_minutes(),
        max_concurrent_passes = config.max_concurrent_passes,
        field_owner = %config.field_owner,
        "Configuration loaded"
    );

    let snapshot = match &config.snapshot_file {
        Some(path) => dev::load_snapshot_file(path).await?,
        None => {
            warn!("LEFTOVER_SNAPSHOT_FILE not set; every region will report a client error");
            Snapshot::default()
        }
    };
    let clients = Arc::new(SnapshotClientFactory::new(snapshot));

    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = &config.seed_file {
        if let Err(e) = dev::load_seed_file(&store, path).await {
            error!(error = %format!("{e:#}"), "Failed to load seed");
            return Err(e);
        }
    }

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        clients,
        ReconcilerSettings::from(&config),
    ));
    let worker = Worker::new(store, reconciler, WorkerConfig::from(&config));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Worker task panicked");
    }

    info!("Controller shutdown complete");
    Ok(())
}

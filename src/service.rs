//! Process wiring: logging, storage, engine, servers and shutdown
//!
//! The escrow client and payment watcher are supplied by the embedding binary.

use crate::api;
use crate::config::{LoggingConfig, Settings, StorageBackend, StorageConfig};
use crate::engine::SwapEngine;
use crate::escrow::EscrowClient;
use crate::metrics::MetricsServer;
use crate::payment::PaymentWatcher;
use crate::store::{JsonFileStore, MemoryStore, PostgresStore, SwapStore};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

const DRIVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the swap engine until ctrl-c or SIGTERM
pub async fn run(
    settings: Settings,
    escrow: Arc<dyn EscrowClient>,
    payments: Arc<dyn PaymentWatcher>,
) -> Result<()> {
    init_logging(&settings.logging);

    info!(
        "Starting swap engine v{} on {}",
        env!("CARGO_PKG_VERSION"),
        settings.engine.network
    );

    // Open the swap store
    let store = open_store(&settings.storage).await?;
    store
        .health_check()
        .await
        .context("Swap store is not reachable")?;
    info!("Swap store ready ({:?} backend)", settings.storage.backend);

    let engine = Arc::new(SwapEngine::new(
        settings.engine.clone(),
        store,
        escrow,
        payments,
    )?);

    // In-flight swaps are re-attached before anything else is accepted
    let report = engine.recover().await.context("Recovery sweep failed")?;
    info!(
        "Recovered {} in-flight swaps ({} reconciled with escrow)",
        report.resumed, report.reconciled
    );

    // Start API server
    let api_handle = if settings.api.enabled {
        let config = settings.api.clone();
        let engine = engine.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(config, engine).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Swap engine is running");
    if settings.api.enabled {
        info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    }
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // No new swaps or webhooks while drivers drain
    for handle in [api_handle, metrics_handle].into_iter().flatten() {
        handle.abort();
    }

    // Drivers finish their current step; persisted state is resumed on next start
    engine.shutdown();
    engine.wait_for_drivers(DRIVER_DRAIN_TIMEOUT).await;

    info!("Swap engine stopped");
    Ok(())
}

/// Open the configured storage backend
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn SwapStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::File => {
            let path = config
                .path
                .as_ref()
                .context("storage.path is required for the file backend")?;
            let store = JsonFileStore::new(path)
                .with_context(|| format!("Failed to open swap directory {:?}", path))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Postgres => {
            let store = PostgresStore::connect(config)
                .await
                .context("Failed to connect to Postgres")?;
            store
                .run_migrations()
                .await
                .context("Failed to run database migrations")?;
            Ok(Arc::new(store))
        }
    }
}

/// Install the global tracing subscriber; a second call is a no-op
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swap_engine=debug,sqlx=warn,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

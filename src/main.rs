mod admission;
mod api;
mod config;
mod connectivity;
mod error;
mod gateway;
mod media;
mod queue;
mod reconcile;

use crate::admission::AdmissionPolicy;
use crate::api::{start_api_server, AppState};
use crate::config::{Config, RemoteConfig, RemoteConfigStore};
use crate::connectivity::Connectivity;
use crate::gateway::{S3Transport, UploadGateway};
use crate::queue::MediaQueue;
use crate::reconcile::{run_driver, Reconciler};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Snapvault sync service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    tokio::fs::create_dir_all(&config.storage.data_dir)
        .await
        .context("Failed to create data directory")?;

    // Open the durable queue
    let queue = Arc::new(
        MediaQueue::open(&config.queue_db_path())
            .await
            .context("Failed to open pending-media queue")?,
    );

    // Load any persisted remote config (start-up reconciliation trigger)
    let remote_config_store = Arc::new(RemoteConfigStore::new(config.remote_config_path()));
    let remote_config = remote_config_store
        .load()
        .await
        .context("Failed to load remote config")?
        .unwrap_or_default();
    info!(complete = remote_config.is_complete(), "Remote config loaded");
    let remote_config = Arc::new(RwLock::new(remote_config));

    // Wire the sync core
    let gateway = Arc::new(UploadGateway::new(
        S3Transport::new(),
        config.presigned_url_expiry(),
    ));
    let admission = Arc::new(AdmissionPolicy::new(gateway.clone(), queue.clone()));
    let reconciler = Arc::new(Reconciler::new(queue.clone(), gateway.clone()));

    // Assume online until the connectivity signal says otherwise
    let connectivity = Arc::new(Connectivity::new(true));
    let reconcile_trigger = Arc::new(Notify::new());

    // Spawn the reconciliation driver (runs a start-up pass first)
    let driver_handle = tokio::spawn(run_driver(
        reconciler,
        connectivity.clone(),
        remote_config.clone(),
        reconcile_trigger.clone(),
    ));

    // Spawn the API server
    let state = AppState {
        queue,
        gateway,
        admission,
        connectivity,
        remote_config,
        remote_config_store,
        reconcile_trigger,
    };
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Sync service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down sync service");

    // Abort tasks; interrupted uploads simply stay queued for the next
    // start-up pass.
    driver_handle.abort();
    api_handle.abort();

    info!("Sync service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

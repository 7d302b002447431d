//! nodeward Interruption Controller
//!
//! Polls the interruption queue for capacity and health notifications
//! and converges the cluster by removing the affected compute claims.
//!
//! ## Architecture
//!
//! - **Worker**: Drives reconcile ticks back to back until shutdown
//! - **Controller**: Classifies a batch, fans out across claims,
//!   applies idempotent lifecycle actions, aggregates errors
//! - **Collaborators**: Queue transport, cluster API, advisory cache,
//!   event recorder and metrics are injected handles

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nodeward_controller::cache::MemoryAdvisoryCache;
use nodeward_controller::cluster::MemoryCluster;
use nodeward_controller::config::Config;
use nodeward_controller::events::LogRecorder;
use nodeward_controller::interruption::{InterruptionController, InterruptionWorker};
use nodeward_controller::metrics::Metrics;
use nodeward_controller::queue::MemoryQueue;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting nodeward interruption controller");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        queue = %config.queue_name,
        error_backoff_secs = config.error_backoff.as_secs(),
        "Configuration loaded"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Collaborators (memory-backed transports for now; the broker and
    // cluster API adapters plug in here)
    let queue = Arc::new(MemoryQueue::new());
    let cluster = Arc::new(MemoryCluster::new());
    let cache = Arc::new(MemoryAdvisoryCache::new());
    let recorder = Arc::new(LogRecorder::new());

    let registry = prometheus::Registry::new();
    let metrics = Metrics::register(&registry)
        .map_err(|e| anyhow::anyhow!("registering metrics: {e}"))?;

    // Start the interruption worker
    let controller = Arc::new(InterruptionController::new(
        queue, cluster, cache, recorder, metrics,
    ));
    let worker = InterruptionWorker::new(controller, config.error_backoff);
    let worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            worker.run(shutdown_rx).await;
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = worker_handle => {
            info!("Interruption worker exited");
        }
    }

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);

    info!("Interruption controller shutdown complete");
    Ok(())
}

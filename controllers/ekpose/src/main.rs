//! ekpose Controller
//!
//! Watches Deployments and makes sure each one has a Service:
//! - same namespace and name as the Deployment
//! - selector equal to the Deployment's pod-template labels
//! - one configurable port
//!
//! Notifications are deduplicated in a rate-limited work queue and drained
//! by a fixed pool of workers; failed keys are retried with exponential
//! backoff.

mod backoff;
mod cache;
mod client;
mod config;
mod controller;
mod error;
mod key;
mod metrics;
mod queue;
mod rate_limit;
mod reconciler;
mod server;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use clap::Parser;
use controller::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    config.validate()?;

    info!("Starting ekpose Controller");
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", config.workers);
    info!("  Cache sync timeout: {:?}", config.cache_sync_timeout());
    info!("  API timeout: {:?}", config.api_timeout());
    info!(
        "  Retries: {} (backoff {:?} to {:?})",
        config.max_retries,
        config.backoff_base(),
        config.backoff_max()
    );
    info!("  Queue rate: {} qps, burst {}", config.queue_qps, config.queue_burst);
    info!("  Service port: {} ({})", config.service_port, config.service_port_name);
    info!("  Metrics address: {}", config.metrics_addr);

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let controller = Controller::new(config).await?;
    controller.run(shutdown).await?;

    info!("ekpose Controller exited");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                return;
            }
            info!("Received SIGINT, shutting down");
        }
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

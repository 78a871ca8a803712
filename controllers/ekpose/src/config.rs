//! Command-line and environment configuration.

use crate::backoff::ExponentialBackoff;
use crate::error::ControllerError;
use crate::queue::QueueConfig;
use crate::reconciler::ServicePolicy;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Connect timeout for the cluster client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ekpose: gives every Deployment a Service selecting its pods.
#[derive(Debug, Clone, Parser)]
#[command(name = "ekpose", version, about)]
pub struct Config {
    /// Path to a kubeconfig file. Without it the in-cluster or default
    /// kubeconfig is used.
    #[arg(long, env = "EKPOSE_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Only watch Deployments in this namespace (default: all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Number of reconcile workers
    #[arg(long, env = "EKPOSE_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Seconds to wait for the initial Deployment list before starting
    /// workers anyway
    #[arg(long, env = "EKPOSE_CACHE_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    pub cache_sync_timeout_secs: u64,

    /// Timeout for each Service API call, in seconds
    #[arg(long, env = "EKPOSE_API_TIMEOUT_SECS", default_value_t = 10)]
    pub api_timeout_secs: u64,

    /// Retries per key before it is dropped
    #[arg(long, env = "EKPOSE_MAX_RETRIES", default_value_t = 15)]
    pub max_retries: u32,

    /// First retry delay, in milliseconds
    #[arg(long, env = "EKPOSE_BACKOFF_BASE_MS", default_value_t = 5)]
    pub backoff_base_ms: u64,

    /// Retry delay cap, in seconds
    #[arg(long, env = "EKPOSE_BACKOFF_MAX_SECS", default_value_t = 300)]
    pub backoff_max_secs: u64,

    /// Sustained rate at which keys leave the queue
    #[arg(long, env = "EKPOSE_QUEUE_QPS", default_value_t = 10)]
    pub queue_qps: u32,

    /// Keys that may leave the queue back to back
    #[arg(long, env = "EKPOSE_QUEUE_BURST", default_value_t = 100)]
    pub queue_burst: u32,

    /// Listen address for /metrics, /healthz and /readyz
    #[arg(long, env = "EKPOSE_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Port exposed on each Service
    #[arg(long, env = "EKPOSE_SERVICE_PORT", default_value_t = 80)]
    pub service_port: i32,

    /// Name of the exposed port
    #[arg(long, env = "EKPOSE_SERVICE_PORT_NAME", default_value = "http")]
    pub service_port_name: String,
}

impl Config {
    /// Rejects settings the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "--workers must be at least 1".to_string(),
            ));
        }
        if self.queue_qps == 0 || self.queue_burst == 0 {
            return Err(ControllerError::InvalidConfig(
                "--queue-qps and --queue-burst must be at least 1".to_string(),
            ));
        }
        if self.backoff_base_ms == 0 {
            return Err(ControllerError::InvalidConfig(
                "--backoff-base-ms must be at least 1".to_string(),
            ));
        }
        if self.backoff_base() > self.backoff_max() {
            return Err(ControllerError::InvalidConfig(format!(
                "--backoff-base-ms ({}ms) exceeds --backoff-max-secs ({}s)",
                self.backoff_base_ms, self.backoff_max_secs
            )));
        }
        if self.api_timeout_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "--api-timeout-secs must be at least 1".to_string(),
            ));
        }
        if !(1..=65535).contains(&self.service_port) {
            return Err(ControllerError::InvalidConfig(format!(
                "--service-port {} is out of range",
                self.service_port
            )));
        }
        if self.service_port_name.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "--service-port-name must not be empty".to_string(),
            ));
        }
        if matches!(&self.namespace, Some(ns) if ns.is_empty()) {
            return Err(ControllerError::InvalidConfig(
                "--namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        CONNECT_TIMEOUT
    }

    /// Queue policy derived from the retry and rate flags.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            backoff: ExponentialBackoff::new(self.backoff_base(), self.backoff_max()),
            max_retries: self.max_retries,
            qps: self.queue_qps,
            burst: self.queue_burst,
        }
    }

    pub fn service_policy(&self) -> ServicePolicy {
        ServicePolicy {
            port: self.service_port,
            port_name: self.service_port_name.clone(),
        }
    }
}

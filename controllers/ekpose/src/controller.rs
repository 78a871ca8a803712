//! Main controller implementation.
//!
//! This module contains the worker pool that drains the work queue and the
//! `Controller` that wires the watch, the queue, the workers and the
//! metrics server together and runs them until shutdown.

use crate::cache::{wait_for_cache_sync, DeploymentCache, StoreCache, SyncOutcome};
use crate::client::create_client;
use crate::config::Config;
use crate::error::ControllerError;
use crate::key::ReconcileKey;
use crate::metrics::Metrics;
use crate::queue::{Requeue, WorkQueue};
use crate::reconciler::Reconciler;
use crate::server;
use crate::watcher::{deployment_events, forward_keys, EventBridge};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use kube_runtime::reflector;
use prometheus::Registry;
use service_client::KubeServiceClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the channel between the event bridge and the queue forwarder.
const KEY_CHANNEL_CAPACITY: usize = 1024;

/// Fixed-size pool of workers draining the work queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    metrics: Metrics,
    workers: usize,
}

impl WorkerPool {
    /// Creates a pool of `workers` workers.
    pub fn new(queue: WorkQueue, reconciler: Arc<Reconciler>, metrics: Metrics, workers: usize) -> Self {
        Self {
            queue,
            reconciler,
            metrics,
            workers: workers.max(1),
        }
    }

    /// Waits for the cache to sync, then runs the workers until shutdown.
    ///
    /// If the cache does not sync within `sync_timeout` the workers start
    /// anyway; the condition is logged and stays visible through the
    /// `ekpose_cache_synced` gauge and the readiness probe. Cancelling
    /// `shutdown` shuts the queue down; each worker finishes its current key
    /// and exits.
    pub async fn run(
        &self,
        cache: Arc<dyn DeploymentCache>,
        sync_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<(), ControllerError> {
        info!(timeout = ?sync_timeout, "Waiting for Deployment cache to sync");
        match wait_for_cache_sync(cache.as_ref(), sync_timeout, &shutdown).await {
            SyncOutcome::Synced => {
                info!("Deployment cache synced");
                self.metrics.cache_synced.set(1);
            }
            SyncOutcome::NotSynced => {
                error!(
                    timeout = ?sync_timeout,
                    "Deployment cache did not sync in time, starting workers in degraded mode"
                );
            }
            SyncOutcome::Shutdown => {
                info!("Shutdown requested before cache sync, workers not started");
                self.queue.shut_down();
                return Ok(());
            }
        }

        let stop = tokio::spawn({
            let queue = self.queue.clone();
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                queue.shut_down();
            }
        });

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker {
                id,
                queue: self.queue.clone(),
                reconciler: Arc::clone(&self.reconciler),
                metrics: self.metrics.clone(),
            };
            workers.spawn(worker.run());
        }
        info!(workers = self.workers, "Workers started");

        let mut result = Ok(());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
                result = Err(ControllerError::Task(e));
            }
        }
        stop.abort();
        if !self.queue.is_empty() {
            info!(abandoned = self.queue.len(), "Queued keys abandoned at shutdown");
        }
        info!("All workers stopped");
        result
    }
}

struct Worker {
    id: usize,
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    metrics: Metrics,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");
        while let Some(key) = self.queue.take().await {
            self.process(&key).await;
            self.queue.mark_done(&key);
        }
        debug!(worker = self.id, "Worker stopped");
    }

    async fn process(&self, key: &ReconcileKey) {
        debug!(
            worker = self.id,
            key = %key,
            attempt = self.queue.num_requeues(key) + 1,
            "Reconciling"
        );
        let timer = self.metrics.reconcile_duration_seconds.start_timer();
        let result = self.reconciler.reconcile(key).await;
        timer.observe_duration();

        match result {
            Ok(action) => {
                self.outcome(action.as_str());
                self.queue.mark_succeeded(key);
                debug!(key = %key, action = action.as_str(), "Reconciled");
            }
            Err(err) if err.is_retryable() => {
                self.outcome("retryable");
                match self.queue.mark_failed(key) {
                    Requeue::Scheduled { attempt, delay } => {
                        warn!(key = %key, attempt, retry_in = ?delay, reason = %err, "Reconcile failed, will retry");
                    }
                    Requeue::GaveUp { attempts } => {
                        error!(key = %key, attempts, reason = %err, "Reconcile failed, retries exhausted, dropping key");
                        self.metrics.dropped_total.with_label_values(&["max_retries"]).inc();
                    }
                    Requeue::ShuttingDown => {
                        debug!(key = %key, reason = %err, "Reconcile failed during shutdown, not retrying");
                    }
                }
            }
            Err(err) => {
                self.outcome("permanent");
                error!(key = %key, reason = %err, "Reconcile failed permanently, dropping key");
                self.metrics.dropped_total.with_label_values(&["permanent"]).inc();
                self.queue.mark_succeeded(key);
            }
        }
    }

    fn outcome(&self, outcome: &str) {
        self.metrics.reconcile_total.with_label_values(&[outcome]).inc();
    }
}

/// Main controller for the Deployment → Service loop.
pub struct Controller {
    config: Config,
    client: Client,
    registry: Registry,
    metrics: Metrics,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Fails if no cluster client can be built from the configuration.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing ekpose controller");

        let client = create_client(config.kubeconfig.as_deref(), config.connect_timeout()).await?;

        let registry = Registry::new();
        let metrics = Metrics::new(&registry)?;

        Ok(Self {
            config,
            client,
            registry,
            metrics,
        })
    }

    /// Runs the controller until `shutdown` is cancelled or a component fails.
    ///
    /// The first component to stop cancels `shutdown` for the others.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        let Self {
            config,
            client,
            registry,
            metrics,
        } = self;

        let api: Api<Deployment> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let (reader, writer) = reflector::store::<Deployment>();
        let cache: Arc<dyn DeploymentCache> = Arc::new(StoreCache::new(reader));

        let queue = WorkQueue::new(config.queue_config(), metrics.clone());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cache),
            Box::new(KubeServiceClient::new(client)),
            config.service_policy(),
            config.api_timeout(),
        ));
        let pool = WorkerPool::new(queue.clone(), reconciler, metrics.clone(), config.workers);
        let (bridge, keys) = EventBridge::channel(KEY_CHANNEL_CAPACITY, metrics);

        let mut tasks: JoinSet<(&'static str, Result<(), ControllerError>)> = JoinSet::new();
        tasks.spawn({
            let shutdown = shutdown.clone();
            async move { ("watcher", bridge.run(deployment_events(api, writer), shutdown).await) }
        });
        tasks.spawn(async move {
            forward_keys(keys, queue).await;
            ("forwarder", Ok(()))
        });
        tasks.spawn({
            let router = server::router(registry, Arc::clone(&cache));
            let addr = config.metrics_addr;
            let shutdown = shutdown.clone();
            async move { ("server", server::serve(addr, router, shutdown).await) }
        });
        tasks.spawn({
            let timeout = config.cache_sync_timeout();
            let shutdown = shutdown.clone();
            async move { ("workers", pool.run(cache, timeout, shutdown).await) }
        });
        info!("ekpose controller running");

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (component, result) = match joined {
                Ok(done) => done,
                Err(e) => ("task", Err(ControllerError::Task(e))),
            };
            match result {
                Ok(()) => info!(component, "Component stopped"),
                Err(e) => {
                    error!(component, error = %e, "Component failed");
                    first_error.get_or_insert(e);
                }
            }
            if !shutdown.is_cancelled() {
                info!("Stopping remaining components");
                shutdown.cancel();
            }
        }

        info!("ekpose controller stopped");
        first_error.map_or(Ok(()), Err)
    }
}

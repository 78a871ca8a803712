//! Deployment watch and event bridge.
//!
//! This module watches Deployments, keeps the reflector cache up to date and
//! turns every notification into a [`ReconcileKey`]. Keys travel over a
//! bounded channel to a forwarder that submits them to the work queue, so
//! the watch loop itself never touches the Service API.

use crate::error::ControllerError;
use crate::key::ReconcileKey;
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube::Api;
use kube_runtime::reflector::store::Writer;
use kube_runtime::{watcher, WatchStreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Watch stream for Deployments that also feeds `writer`.
///
/// Watch errors are retried with kube-runtime's default backoff and still
/// surface as `Err` items so they can be logged.
pub fn deployment_events(
    api: Api<Deployment>,
    writer: Writer<Deployment>,
) -> impl Stream<Item = Result<watcher::Event<Deployment>, watcher::Error>> + Send {
    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
}

/// Translates watch notifications into queue keys.
///
/// Objects of a (re)list only become visible in the reflector store once the
/// list completes, so their keys are held back until `InitDone`.
#[derive(Debug)]
pub struct EventBridge {
    tx: mpsc::Sender<ReconcileKey>,
    metrics: Metrics,
    /// Keys seen in the list currently being received
    pending: Vec<ReconcileKey>,
}

impl EventBridge {
    /// Creates a bridge and the receiving end of its key channel.
    #[must_use]
    pub fn channel(capacity: usize, metrics: Metrics) -> (Self, mpsc::Receiver<ReconcileKey>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                metrics,
                pending: Vec::new(),
            },
            rx,
        )
    }

    /// Drains `events` until it ends or `shutdown` fires.
    ///
    /// `events` must already have been applied to the cache, as the stream
    /// from [`deployment_events`] is.
    pub async fn run<S>(mut self, events: S, shutdown: CancellationToken) -> Result<(), ControllerError>
    where
        S: Stream<Item = Result<watcher::Event<Deployment>, watcher::Error>> + Send,
    {
        info!("Starting Deployment watcher");
        let mut events = Box::pin(events);

        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Deployment watcher stopping");
                    return Ok(());
                }
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if !self.handle_event(event).await {
                        debug!("Key channel closed, stopping Deployment watcher");
                        return Ok(());
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Deployment watch error, retrying with backoff");
                }
                None => {
                    return Err(ControllerError::Watch(
                        "Deployment watch stream ended".to_string(),
                    ));
                }
            }
        }
    }

    /// Handles one notification. Returns `false` once the key channel is closed.
    pub async fn handle_event(&mut self, event: watcher::Event<Deployment>) -> bool {
        match event {
            watcher::Event::Apply(deployment) => {
                self.count("apply");
                match self.key_of(&deployment) {
                    Some(key) => {
                        debug!(key = %key, "Deployment applied");
                        self.tx.send(key).await.is_ok()
                    }
                    None => true,
                }
            }
            watcher::Event::InitApply(deployment) => {
                self.count("init_apply");
                if let Some(key) = self.key_of(&deployment) {
                    self.pending.push(key);
                }
                true
            }
            watcher::Event::Delete(deployment) => {
                self.count("delete");
                self.on_delete(&deployment);
                true
            }
            watcher::Event::Init => {
                debug!("Deployment watcher (re)listing");
                self.pending.clear();
                true
            }
            watcher::Event::InitDone => {
                info!(objects = self.pending.len(), "Deployment cache synced");
                self.metrics.cache_synced.set(1);
                for key in std::mem::take(&mut self.pending) {
                    if self.tx.send(key).await.is_err() {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Key of an added or modified object. Malformed objects are logged and dropped.
    fn key_of(&self, deployment: &Deployment) -> Option<ReconcileKey> {
        match ReconcileKey::from_object(deployment) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Dropping Deployment notification without a usable key");
                self.metrics.dropped_total.with_label_values(&["malformed_key"]).inc();
                None
            }
        }
    }

    /// Deletion does not cascade to the Service; the event is only observed.
    fn on_delete(&self, deployment: &Deployment) {
        match ReconcileKey::from_object(deployment) {
            Ok(key) => info!(key = %key, "Deployment deleted, Service left in place"),
            Err(e) => debug!(error = %e, "Deployment deleted"),
        }
    }

    fn count(&self, event: &str) {
        self.metrics.events_total.with_label_values(&[event]).inc();
    }
}

/// Moves keys from the bridge channel into the work queue until the
/// channel closes.
pub async fn forward_keys(mut rx: mpsc::Receiver<ReconcileKey>, queue: WorkQueue) {
    while let Some(key) = rx.recv().await {
        if !queue.submit(key.clone()) && queue.is_shutting_down() {
            error!(key = %key, "Work queue shut down, discarding key");
            break;
        }
    }
    debug!("Key forwarder stopped");
}

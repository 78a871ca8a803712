//! Test utilities for unit testing the control loop
//!
//! This module provides an in-memory Deployment cache and helpers for
//! building test objects.

use crate::cache::DeploymentCache;
use crate::key::ReconcileKey;
use crate::reconciler::{Reconciler, ServicePolicy};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use service_client::MockServiceClient;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// In-memory [`DeploymentCache`] with a manually flipped sync gate
#[derive(Debug)]
pub struct MemoryCache {
    objects: RwLock<HashMap<ReconcileKey, Arc<Deployment>>>,
    synced_tx: watch::Sender<bool>,
}

impl MemoryCache {
    pub fn new() -> Self {
        let (synced_tx, _) = watch::channel(false);
        Self {
            objects: RwLock::new(HashMap::new()),
            synced_tx,
        }
    }

    /// Insert or replace a Deployment
    pub fn upsert(&self, deployment: Deployment) {
        let key = ReconcileKey::from_object(&deployment).unwrap();
        self.objects.write().unwrap().insert(key, Arc::new(deployment));
    }

    pub fn remove(&self, key: &ReconcileKey) {
        self.objects.write().unwrap().remove(key);
    }

    pub fn mark_synced(&self) {
        self.synced_tx.send_replace(true);
    }
}

#[async_trait::async_trait]
impl DeploymentCache for MemoryCache {
    fn get(&self, key: &ReconcileKey) -> Option<Arc<Deployment>> {
        self.objects.read().unwrap().get(key).cloned()
    }

    fn has_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    async fn wait_synced(&self) -> bool {
        let mut rx = self.synced_tx.subscribe();
        rx.wait_for(|synced| *synced).await.is_ok()
    }
}

/// Helper to create a test Deployment whose pod template carries `labels`
pub fn create_test_deployment(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Deployment {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to build a selector map
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Reconciler over `cache` and `services` with the default port policy
pub fn create_test_reconciler(cache: Arc<MemoryCache>, services: MockServiceClient) -> Reconciler {
    Reconciler::new(
        cache,
        Box::new(services),
        ServicePolicy::default(),
        Duration::from_secs(10),
    )
}

//! Reconciliation logic for Deployment-backed Services.
//!
//! Every Deployment gets a Service with the same namespace and name whose
//! selector is the Deployment's pod-template labels. Reconciliation is
//! level-based: each call re-reads the cached Deployment and the live
//! Service and converges the latter, without remembering earlier runs.

use crate::cache::DeploymentCache;
use crate::error::ReconcileError;
use crate::key::ReconcileKey;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use service_client::{ServiceClientTrait, ServiceError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label marking Services created by this controller.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "ekpose";

/// Port exposed on every managed Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePolicy {
    /// Service port (the target port defaults to the same number)
    pub port: i32,
    /// Port name
    pub port_name: String,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            port: 80,
            port_name: "http".to_string(),
        }
    }
}

/// What a successful reconcile did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// The Deployment is gone; nothing to do
    SourceAbsent,
    /// Service created
    Created,
    /// Create raced with another writer; the Service is there
    AlreadyExists,
    /// Service already matches
    Unchanged,
    /// Service selector brought back in line
    Updated,
}

impl SyncAction {
    /// Short label used for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceAbsent => "source_absent",
            Self::Created => "created",
            Self::AlreadyExists => "already_exists",
            Self::Unchanged => "unchanged",
            Self::Updated => "updated",
        }
    }
}

/// Converges Services toward their Deployments.
pub struct Reconciler {
    cache: Arc<dyn DeploymentCache>,
    services: Box<dyn ServiceClientTrait>,
    policy: ServicePolicy,
    api_timeout: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy", &self.policy)
            .field("api_timeout", &self.api_timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    ///
    /// `api_timeout` bounds every individual Service API call.
    pub fn new(
        cache: Arc<dyn DeploymentCache>,
        services: Box<dyn ServiceClientTrait>,
        policy: ServicePolicy,
        api_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            services,
            policy,
            api_timeout,
        }
    }

    /// Reconciles the Service for the Deployment named by `key`.
    ///
    /// This method:
    /// 1. Looks the Deployment up in the cache (absent means it was deleted
    ///    after the key was queued, which is not an error)
    /// 2. Computes the desired Service
    /// 3. Creates it if missing, or rewrites its selector if it drifted.
    ///    A rewritten Service is stamped with [`MANAGED_BY_LABEL`].
    ///
    /// Transient API failures come back as [`ReconcileError::Retryable`];
    /// objects the API server rejects come back as
    /// [`ReconcileError::Permanent`].
    pub async fn reconcile(&self, key: &ReconcileKey) -> Result<SyncAction, ReconcileError> {
        let Some(deployment) = self.cache.get(key) else {
            debug!(key = %key, "Deployment no longer exists, nothing to reconcile");
            return Ok(SyncAction::SourceAbsent);
        };

        let desired = self.desired_service(key, &deployment)?;
        let namespace = key.namespace();

        match self.call("get", self.services.get_service(namespace, key.name())).await {
            Err(ServiceError::NotFound(_)) => {
                match self.call("create", self.services.create_service(namespace, &desired)).await {
                    Ok(_) => {
                        info!(key = %key, "Created Service");
                        Ok(SyncAction::Created)
                    }
                    Err(ServiceError::AlreadyExists(_)) => {
                        debug!(key = %key, "Service created concurrently");
                        Ok(SyncAction::AlreadyExists)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
            Ok(existing) => {
                let desired_selector = desired.spec.as_ref().and_then(|s| s.selector.as_ref());
                let current_selector = existing.spec.as_ref().and_then(|s| s.selector.as_ref());
                if current_selector == desired_selector {
                    debug!(key = %key, "Service selector up to date");
                    return Ok(SyncAction::Unchanged);
                }

                let mut updated = existing.clone();
                updated.spec.get_or_insert_with(ServiceSpec::default).selector =
                    desired_selector.cloned();
                let labels = updated.metadata.labels.get_or_insert_with(BTreeMap::new);
                if labels.get(MANAGED_BY_LABEL).map(String::as_str) != Some(MANAGED_BY_VALUE) {
                    warn!(key = %key, "Taking over Service not managed by ekpose");
                    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
                }
                self.call("update", self.services.update_service(namespace, &updated))
                    .await?;
                info!(
                    key = %key,
                    from = ?current_selector,
                    to = ?desired_selector,
                    "Updated Service selector"
                );
                Ok(SyncAction::Updated)
            }
        }
    }

    /// Builds the Service that should exist for `deployment`.
    ///
    /// A Deployment without pod-template labels has nothing to select; that
    /// cannot be fixed by retrying, so it is a permanent failure.
    pub fn desired_service(
        &self,
        key: &ReconcileKey,
        deployment: &Deployment,
    ) -> Result<Service, ReconcileError> {
        let selector = pod_template_labels(deployment)
            .filter(|labels| !labels.is_empty())
            .ok_or_else(|| {
                ReconcileError::Permanent(format!(
                    "Deployment {key} has no pod template labels to select on"
                ))
            })?;

        Ok(Service {
            metadata: ObjectMeta {
                name: Some(key.name().to_string()),
                namespace: Some(key.namespace().to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(selector.clone()),
                ports: Some(vec![ServicePort {
                    name: Some(self.policy.port_name.clone()),
                    port: self.policy.port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        })
    }

    async fn call<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        tokio::time::timeout(self.api_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::Transient(format!(
                    "Service {op} timed out after {:?}",
                    self.api_timeout
                )))
            })
    }
}

/// Labels of the Deployment's pod template.
fn pod_template_labels(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .labels
        .as_ref()
}

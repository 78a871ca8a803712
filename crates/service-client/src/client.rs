//! Kube-backed Service client

use crate::error::ServiceError;
use crate::service_trait::ServiceClientTrait;
use k8s_openapi::api::core::v1::Service;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

/// Field manager recorded on every write made by the controller.
pub const FIELD_MANAGER: &str = "ekpose";

/// Service client talking to the cluster API server.
#[derive(Clone)]
pub struct KubeServiceClient {
    client: Client,
}

impl std::fmt::Debug for KubeServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeServiceClient").finish_non_exhaustive()
    }
}

impl KubeServiceClient {
    /// Creates a client sharing the given kube `Client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }
}

fn service_name(service: &Service) -> Result<&str, ServiceError> {
    service
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ServiceError::Invalid("Service is missing metadata.name".to_string()))
}

#[async_trait::async_trait]
impl ServiceClientTrait for KubeServiceClient {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ServiceError> {
        debug!(namespace, name, "GET Service");
        Ok(self.api(namespace).get(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ServiceError> {
        debug!(namespace, name = ?service.metadata.name, "POST Service");
        Ok(self.api(namespace).create(&Self::post_params(), service).await?)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, ServiceError> {
        let name = service_name(service)?;
        debug!(namespace, name, "PUT Service");
        Ok(self
            .api(namespace)
            .replace(name, &Self::post_params(), service)
            .await?)
    }
}

//! ServiceClient trait for mocking
//!
//! This trait abstracts Service CRUD so the reconciler can be unit tested
//! against an in-memory implementation instead of a live cluster.

use crate::error::ServiceError;
use k8s_openapi::api::core::v1::Service;

/// Trait for Kubernetes Service API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ServiceClientTrait: Send + Sync {
    /// Fetch a Service by namespace and name.
    ///
    /// Returns [`ServiceError::NotFound`] when it does not exist.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ServiceError>;

    /// Create a Service in `namespace`.
    ///
    /// Returns [`ServiceError::AlreadyExists`] when an object with the same
    /// name is already present.
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ServiceError>;

    /// Replace an existing Service in `namespace`.
    ///
    /// The object's `resourceVersion` is used for optimistic concurrency;
    /// a stale version yields [`ServiceError::Conflict`].
    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, ServiceError>;
}

//! Mock ServiceClient for unit testing
//!
//! Stores Services in memory, mimics the API server's create/replace
//! semantics (name collisions, resourceVersion checks) and can be scripted
//! to fail or stall specific operations.

use crate::error::ServiceError;
use crate::service_trait::ServiceClientTrait;
use k8s_openapi::api::core::v1::Service;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// API operation kinds recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOp {
    /// `get_service`
    Get,
    /// `create_service`
    Create,
    /// `update_service`
    Update,
}

type ServiceKey = (String, String);

/// Mock ServiceClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockServiceClient {
    services: Arc<Mutex<HashMap<ServiceKey, Service>>>,
    failures: Arc<Mutex<HashMap<ServiceOp, VecDeque<ServiceError>>>>,
    calls: Arc<Mutex<Vec<(ServiceOp, String)>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    next_version: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockServiceClient {
    /// Create an empty mock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a Service (for test setup). The namespace is taken from its metadata.
    pub fn add_service(&self, mut service: Service) {
        let namespace = service.metadata.namespace.clone().unwrap_or_default();
        let name = service.metadata.name.clone().unwrap_or_default();
        service.metadata.resource_version = Some(self.bump_version());
        lock(&self.services).insert((namespace, name), service);
    }

    /// Current stored copy of a Service
    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        lock(&self.services)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of stored Services
    #[must_use]
    pub fn service_count(&self) -> usize {
        lock(&self.services).len()
    }

    /// Make the next call of `op` fail with `error`. Calls queue up in order.
    pub fn fail_next(&self, op: ServiceOp, error: ServiceError) {
        lock(&self.failures).entry(op).or_default().push_back(error);
    }

    /// Delay every call by `latency` before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Number of calls made for `op`, failed ones included
    #[must_use]
    pub fn calls(&self, op: ServiceOp) -> usize {
        lock(&self.calls).iter().filter(|(o, _)| *o == op).count()
    }

    /// Number of create and update calls made, failed ones included
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.calls(ServiceOp::Create) + self.calls(ServiceOp::Update)
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    async fn enter(&self, op: ServiceOp, namespace: &str, name: &str) -> Result<(), ServiceError> {
        lock(&self.calls).push((op, format!("{namespace}/{name}")));
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn name_of(service: &Service) -> Result<String, ServiceError> {
    service
        .metadata
        .name
        .clone()
        .ok_or_else(|| ServiceError::Invalid("Service is missing metadata.name".to_string()))
}

#[async_trait::async_trait]
impl ServiceClientTrait for MockServiceClient {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ServiceError> {
        self.enter(ServiceOp::Get, namespace, name).await?;
        self.service(namespace, name)
            .ok_or_else(|| ServiceError::NotFound(format!("services \"{name}\" not found")))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ServiceError> {
        let name = name_of(service)?;
        self.enter(ServiceOp::Create, namespace, &name).await?;

        let mut services = lock(&self.services);
        let key = (namespace.to_string(), name.clone());
        if services.contains_key(&key) {
            return Err(ServiceError::AlreadyExists(format!(
                "services \"{name}\" already exists"
            )));
        }
        let mut stored = service.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.bump_version());
        services.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, ServiceError> {
        let name = name_of(service)?;
        self.enter(ServiceOp::Update, namespace, &name).await?;

        let mut services = lock(&self.services);
        let key = (namespace.to_string(), name.clone());
        let Some(current) = services.get(&key) else {
            return Err(ServiceError::NotFound(format!("services \"{name}\" not found")));
        };
        if service.metadata.resource_version.is_some()
            && service.metadata.resource_version != current.metadata.resource_version
        {
            return Err(ServiceError::Conflict(format!(
                "Operation cannot be fulfilled on services \"{name}\": the object has been modified"
            )));
        }
        let mut stored = service.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.bump_version());
        services.insert(key, stored.clone());
        Ok(stored)
    }
}

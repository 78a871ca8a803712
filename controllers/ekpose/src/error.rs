//! Controller-specific error types.
//!
//! This module defines error types specific to the ekpose controller
//! that are not covered by upstream library errors.

use service_client::ServiceError;
use thiserror::Error;

/// Errors that can occur while bootstrapping or running the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cluster credentials could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics/probe server failed
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),

    /// Background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A notified object that does not identify a namespaced resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// `metadata.name` is absent or empty
    #[error("object has no name")]
    MissingName,

    /// `metadata.namespace` is absent or empty
    #[error("object {0} has no namespace")]
    MissingNamespace(String),

    /// A `namespace/name` string that does not split into two parts
    #[error("malformed key {0:?}: expected namespace/name")]
    Malformed(String),
}

/// Outcome of a failed reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// Try again after backoff
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Retrying cannot help; the key is dropped
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ReconcileError {
    /// Whether the key should go back to the queue.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl From<ServiceError> for ReconcileError {
    fn from(err: ServiceError) -> Self {
        if matches!(err, ServiceError::Invalid(_)) {
            Self::Permanent(err.to_string())
        } else {
            // Unexpected NotFound/AlreadyExists: retry with a fresh read.
            Self::Retryable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_mapping() {
        let invalid = ReconcileError::from(ServiceError::Invalid("port out of range".to_string()));
        assert!(!invalid.is_retryable());

        let transient = ReconcileError::from(ServiceError::Transient("timeout".to_string()));
        assert!(transient.is_retryable());

        let conflict = ReconcileError::from(ServiceError::Conflict("stale".to_string()));
        assert!(conflict.is_retryable());
    }
}

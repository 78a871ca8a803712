//! Service client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Service API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Service does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create rejected because the name is taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency failure (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The API server rejected the object itself
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Network, throttling, timeout or server-side failure
    #[error("Transient error: {0}")]
    Transient(String),
}

impl ServiceError {
    /// Classify an API status response.
    ///
    /// 404 is not-found, 409 splits on the `AlreadyExists` reason, 400 and
    /// 422 are invalid requests. Anything else is worth retrying.
    #[must_use]
    pub fn from_status(code: u16, reason: &str, message: String) -> Self {
        match code {
            404 => Self::NotFound(message),
            409 if reason == "AlreadyExists" => Self::AlreadyExists(message),
            409 => Self::Conflict(message),
            400 | 422 => Self::Invalid(message),
            _ => Self::Transient(format!("{code} {reason}: {message}")),
        }
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Transient(_))
    }
}

impl From<kube::Error> for ServiceError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self::from_status(resp.code, &resp.reason, resp.message),
            other => Self::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            ServiceError::from_status(404, "NotFound", "services \"web\" not found".to_string()),
            ServiceError::NotFound("services \"web\" not found".to_string())
        );
        assert!(matches!(
            ServiceError::from_status(409, "AlreadyExists", String::new()),
            ServiceError::AlreadyExists(_)
        ));
        assert!(matches!(
            ServiceError::from_status(409, "Conflict", String::new()),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from_status(422, "Invalid", String::new()),
            ServiceError::Invalid(_)
        ));
        assert!(matches!(
            ServiceError::from_status(400, "BadRequest", String::new()),
            ServiceError::Invalid(_)
        ));
        assert!(matches!(
            ServiceError::from_status(429, "TooManyRequests", String::new()),
            ServiceError::Transient(_)
        ));
        assert!(matches!(
            ServiceError::from_status(503, "ServiceUnavailable", String::new()),
            ServiceError::Transient(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(ServiceError::Transient("reset".to_string()).is_retryable());
        assert!(ServiceError::Conflict("stale".to_string()).is_retryable());
        assert!(!ServiceError::Invalid("bad port".to_string()).is_retryable());
        assert!(!ServiceError::AlreadyExists("web".to_string()).is_retryable());
        assert!(!ServiceError::NotFound("web".to_string()).is_retryable());
    }

    #[test]
    fn test_from_kube_api_error() {
        let err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "services \"web\" already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        });
        assert_eq!(
            ServiceError::from(err),
            ServiceError::AlreadyExists("services \"web\" already exists".to_string())
        );
    }
}

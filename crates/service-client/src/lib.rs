//! Kubernetes Service API client
//!
//! The cluster-API collaborator used by the ekpose controller to read, create
//! and update the `Service` objects it manages.
//!
//! # Example
//!
//! ```no_run
//! use service_client::{KubeServiceClient, ServiceClientTrait, ServiceError};
//!
//! # async fn example(client: kube::Client) -> Result<(), ServiceError> {
//! let services = KubeServiceClient::new(client);
//!
//! match services.get_service("default", "web").await {
//!     Ok(svc) => println!("found {:?}", svc.metadata.name),
//!     Err(ServiceError::NotFound(_)) => println!("not created yet"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Typed errors**: every API failure is classified as not-found,
//!   already-exists, conflict, invalid or transient
//! - **Mocking**: `MockServiceClient` (feature `test-util`) keeps services in
//!   memory and can inject failures and latency

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod service_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{KubeServiceClient, FIELD_MANAGER};
pub use error::ServiceError;
pub use service_trait::ServiceClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockServiceClient, ServiceOp};

//! Integration tests for the kube-backed Service client
//!
//! These tests require a reachable cluster (current kubeconfig context).
//! Set EKPOSE_TEST_NAMESPACE to choose the namespace, defaults to "default".

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use service_client::{KubeServiceClient, ServiceClientTrait, ServiceError};
use std::collections::BTreeMap;

fn namespace() -> String {
    std::env::var("EKPOSE_TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

fn test_service(name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore] // Requires running cluster
async fn test_get_missing_service() {
    let client = kube::Client::try_default().await.expect("Failed to create client");
    let services = KubeServiceClient::new(client);

    let result = services.get_service(&namespace(), "ekpose-does-not-exist").await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
#[ignore] // Requires running cluster
async fn test_create_twice_reports_already_exists() {
    let client = kube::Client::try_default().await.expect("Failed to create client");
    let services = KubeServiceClient::new(client);
    let ns = namespace();
    let svc = test_service("ekpose-it-create");

    // First create may race a leftover from a previous run
    match services.create_service(&ns, &svc).await {
        Ok(_) | Err(ServiceError::AlreadyExists(_)) => {}
        Err(e) => panic!("unexpected create error: {e}"),
    }

    let second = services.create_service(&ns, &svc).await;
    assert!(matches!(second, Err(ServiceError::AlreadyExists(_))));
}

#[tokio::test]
#[ignore] // Requires running cluster
async fn test_update_selector() {
    let client = kube::Client::try_default().await.expect("Failed to create client");
    let services = KubeServiceClient::new(client);
    let ns = namespace();

    let _ = services.create_service(&ns, &test_service("ekpose-it-update")).await;
    let mut current = services
        .get_service(&ns, "ekpose-it-update")
        .await
        .expect("Failed to get service");

    let selector = BTreeMap::from([("app".to_string(), "changed".to_string())]);
    if let Some(spec) = current.spec.as_mut() {
        spec.selector = Some(selector.clone());
    }
    let updated = services
        .update_service(&ns, &current)
        .await
        .expect("Failed to update service");

    assert_eq!(updated.spec.and_then(|s| s.selector), Some(selector));
}

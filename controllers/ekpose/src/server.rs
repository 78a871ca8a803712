//! HTTP endpoints for Prometheus scraping and kubelet probes.

use crate::cache::DeploymentCache;
use crate::error::ControllerError;
use crate::metrics::export_metrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared state of the HTTP endpoints.
#[derive(Clone)]
pub struct ServerState {
    registry: Registry,
    cache: Arc<dyn DeploymentCache>,
}

/// Router serving `/metrics`, `/healthz` and `/readyz`.
pub fn router(registry: Registry, cache: Arc<dyn DeploymentCache>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(ServerState { registry, cache })
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    match export_metrics(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Ready once the Deployment cache has completed its initial list.
async fn readyz(State(state): State<ServerState>) -> (StatusCode, &'static str) {
    if state.cache.has_synced() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "cache not synced")
    }
}

/// Serves `router` on `addr` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("Metrics server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::test_utils::MemoryCache;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        metrics.events_total.with_label_values(&["apply"]).inc();

        let (status, body) = get_path(router(registry, Arc::new(MemoryCache::new())), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ekpose_events_total{event=\"apply\"} 1"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) =
            get_path(router(Registry::new(), Arc::new(MemoryCache::new())), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readyz_follows_cache_sync() {
        let cache = Arc::new(MemoryCache::new());
        let app = router(Registry::new(), cache.clone());

        let (status, _) = get_path(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        cache.mark_synced();
        let (status, _) = get_path(app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            "127.0.0.1:0".parse().unwrap(),
            router(Registry::new(), Arc::new(MemoryCache::new())),
            shutdown.clone(),
        ));
        shutdown.cancel();
        assert!(server.await.unwrap().is_ok());
    }
}

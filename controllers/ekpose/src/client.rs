//! Kubernetes client construction.

use crate::error::ControllerError;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Builds a cluster client.
///
/// With an explicit kubeconfig path the file is used; if it cannot be
/// loaded the in-cluster service account is tried before giving up.
/// Without a path the usual inference applies (`KUBECONFIG`,
/// `~/.kube/config`, then in-cluster).
///
/// The read timeout is left at kube's default so long-running watches are
/// not cut off; individual Service calls carry their own deadline.
pub async fn create_client(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
) -> Result<Client, ControllerError> {
    let mut config = match kubeconfig {
        Some(path) => match load_kubeconfig(path).await {
            Ok(config) => {
                info!(path = %path.display(), "Using kubeconfig");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load kubeconfig, trying in-cluster config");
                Config::incluster().map_err(|ie| {
                    ControllerError::Kubeconfig(format!(
                        "failed to load {}: {e}; in-cluster config unavailable: {ie}",
                        path.display()
                    ))
                })?
            }
        },
        None => Config::infer()
            .await
            .map_err(|e| ControllerError::Kubeconfig(format!("failed to infer config: {e}")))?,
    };

    config.connect_timeout = Some(connect_timeout);
    info!(cluster_url = %config.cluster_url, "Connecting to Kubernetes API");
    Ok(Client::try_from(config)?)
}

async fn load_kubeconfig(path: &Path) -> Result<Config, ControllerError> {
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| ControllerError::Kubeconfig(format!("failed to read kubeconfig: {e}")))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ControllerError::Kubeconfig(format!("failed to load kubeconfig: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_kubeconfig_outside_cluster_fails() {
        // Outside a pod the in-cluster fallback has no service account either.
        if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
            return;
        }
        let result = create_client(
            Some(Path::new("/nonexistent/ekpose/kubeconfig")),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ControllerError::Kubeconfig(_))));
    }

    #[tokio::test]
    async fn test_unreadable_kubeconfig_is_reported() {
        let result = load_kubeconfig(Path::new("/nonexistent/ekpose/kubeconfig")).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("failed to read kubeconfig"));
    }
}

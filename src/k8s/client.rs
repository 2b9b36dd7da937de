//! Kubernetes client construction.
//!
//! The job normally runs in-cluster; `--context` selects a kubeconfig context
//! for running it by hand against a remote cluster.

use anyhow::Result;
use tracing::debug;

use crate::error::SmuError;

/// Build a Kubernetes client from the in-cluster config or kubeconfig.
pub async fn build_client(context: Option<&str>) -> Result<kube::Client> {
    let client = match context {
        Some(ctx) => {
            debug!("Using kubeconfig context: {}", ctx);
            let kubeconfig = kube::config::Kubeconfig::read()
                .map_err(|e| SmuError::KubernetesApi("kubeconfig".into(), e.to_string()))?;
            let config = kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions {
                    context: Some(ctx.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                SmuError::KubernetesApi("kubeconfig".into(), format!("context '{ctx}': {e}"))
            })?;
            kube::Client::try_from(config).map_err(|e| {
                SmuError::KubernetesApi("kubeconfig".into(), format!("context '{ctx}': {e}"))
            })?
        }
        None => {
            debug!("Using default client configuration");
            kube::Client::try_default()
                .await
                .map_err(|e| SmuError::KubernetesApi("kubeconfig".into(), e.to_string()))?
        }
    };

    Ok(client)
}

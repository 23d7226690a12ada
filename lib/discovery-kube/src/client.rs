//! Kubernetes client construction

use crate::config::KubernetesConfig;
use crate::discovery::KubernetesDirectory;
use kube::{Client, Config};
use tracing::info;

/// KubernetesClient wraps a Kubernetes client that has reached the API server
pub struct KubernetesClient {
    client: Client,
}

impl KubernetesClient {
    /// Connect using the in-cluster or kubeconfig settings and verify the
    /// API server answers
    pub async fn new() -> anyhow::Result<Self> {
        let config = Config::infer().await?;
        info!("Connecting to Kubernetes at {}", config.cluster_url);
        let client = Client::try_from(config)?;
        Self::probe(client).await
    }

    /// Wrap an existing client after checking connectivity
    pub async fn probe(client: Client) -> anyhow::Result<Self> {
        let version = client.apiserver_version().await?;
        info!("Connected to Kubernetes {}", version.git_version);
        Ok(Self { client })
    }

    /// Get the underlying Kubernetes client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Build a service directory on top of this client
    pub fn directory(&self, config: KubernetesConfig) -> KubernetesDirectory {
        KubernetesDirectory::new(self.client.clone(), config)
    }
}

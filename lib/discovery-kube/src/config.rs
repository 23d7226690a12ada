//! Kubernetes directory configuration

use serde::{Deserialize, Serialize};

/// How a service's target address is built
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetMode {
    /// `{name}.{namespace}.svc.{clusterDomain}:{port}`
    #[default]
    Dns,
    /// `{clusterIP}:{port}`, falling back to DNS for headless services
    ClusterIp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// Namespace to watch. All namespaces when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub cluster_domain: String,
    pub target_mode: TargetMode,
    /// Service port to route to. The first port when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            cluster_domain: "cluster.local".to_string(),
            target_mode: TargetMode::Dns,
            port_name: None,
        }
    }
}

//! Service discovery against the Kubernetes Services API

use crate::config::{KubernetesConfig, TargetMode};
use discovery_core::{DirectoryClient, EntryStream, FetchError, ServiceEntry};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use kube_runtime::{reflector, watcher, WatchStreamExt};
use tracing::debug;

/// KubernetesDirectory lists and watches Services as directory entries
pub struct KubernetesDirectory {
    client: Client,
    config: KubernetesConfig,
}

impl KubernetesDirectory {
    pub fn new(client: Client, config: KubernetesConfig) -> Self {
        Self { client, config }
    }

    fn api(&self) -> Api<Service> {
        match &self.config.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait::async_trait]
impl DirectoryClient for KubernetesDirectory {
    async fn list(&self) -> Result<Vec<ServiceEntry>, FetchError> {
        let list = self
            .api()
            .list(&Default::default())
            .await
            .map_err(|e| FetchError::Client(Box::new(e)))?;

        debug!("Discovered {} services", list.items.len());
        Ok(service_entries(list.items.iter(), &self.config))
    }

    fn watch(&self) -> Option<EntryStream> {
        let (reader, writer) = reflector::store::<Service>();
        let config = self.config.clone();

        let events = watcher(self.api(), watcher::Config::default()).default_backoff();
        let stream = reflector(writer, events).filter_map(move |event| {
            let reader = reader.clone();
            let config = config.clone();
            async move {
                match event {
                    // the store is incomplete until the initial listing is done
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitApply(_)) => None,
                    Ok(_) => {
                        let services = reader.state();
                        Some(Ok(service_entries(
                            services.iter().map(|service| service.as_ref()),
                            &config,
                        )))
                    }
                    Err(e) => Some(Err(FetchError::Watch(e.to_string()))),
                }
            }
        });

        Some(stream.boxed())
    }
}

fn service_entries<'a>(
    services: impl IntoIterator<Item = &'a Service>,
    config: &KubernetesConfig,
) -> Vec<ServiceEntry> {
    services
        .into_iter()
        .filter_map(|service| service_entry(service, config))
        .collect()
}

/// Convert a Service into a directory entry.
///
/// Returns None for services without a name or without a usable port.
pub fn service_entry(service: &Service, config: &KubernetesConfig) -> Option<ServiceEntry> {
    let name = service.metadata.name.as_deref()?;
    let namespace = service.metadata.namespace.as_deref().unwrap_or("default");
    let spec = service.spec.as_ref()?;

    let ports = spec.ports.as_deref().unwrap_or_default();
    let port = match &config.port_name {
        Some(wanted) => ports
            .iter()
            .find(|port| port.name.as_deref() == Some(wanted.as_str())),
        None => ports.first(),
    };
    let Some(port) = port else {
        debug!("Skipping service {}/{}: no matching port", namespace, name);
        return None;
    };

    let dns = format!("{}.{}.svc.{}", name, namespace, config.cluster_domain);
    let host = match config.target_mode {
        TargetMode::Dns => dns,
        TargetMode::ClusterIp => match spec.cluster_ip.as_deref() {
            Some(ip) if ip.contains(':') => format!("[{}]", ip),
            Some(ip) if !ip.is_empty() && ip != "None" => ip.to_string(),
            _ => dns,
        },
    };

    Some(ServiceEntry {
        name: name.to_string(),
        namespace: namespace.to_string(),
        labels: service.metadata.labels.clone().unwrap_or_default(),
        target: format!("{}:{}", host, port.port),
    })
}

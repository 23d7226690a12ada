//! Discovery backend facade

use crate::config::BackendConfig;
use crate::directory::DirectoryClient;
use crate::entry::RouteEvent;
use crate::metrics::DiscoveryMetrics;
use crate::reconcile::ReconciliationLoop;
use crate::registry::{DeregistrationRegistry, RegistryState};
use crate::{DiscoveryError, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capability set shared by every discovery backend the proxy can run
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Register the proxy itself with the directory
    async fn register(&self, services: &[String]) -> Result<()>;

    /// Remove one route, returning once the proxy no longer has it
    async fn deregister(&self, service: &str) -> Result<()>;

    /// Remove every route this backend has published
    async fn deregister_all(&self) -> Result<()>;

    async fn manual_paths(&self) -> Result<Vec<String>>;

    async fn read_manual(&self, path: &str) -> Result<(String, u64)>;

    async fn write_manual(&self, path: &str, value: &str, version: u64) -> Result<bool>;

    /// Start watching the directory and return the route event stream
    async fn watch_services(&self) -> Result<mpsc::Receiver<RouteEvent>>;

    fn watch_manual(&self) -> BoxStream<'static, String>;

    fn watch_no_route_html(&self) -> BoxStream<'static, String>;

    /// Stop watching and close the route event stream
    async fn stop(&self) -> Result<()>;
}

struct Running {
    registry: DeregistrationRegistry,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Backend driven by a read-only service directory.
///
/// Registry state lives from `start` to `stop`; only one reconciliation loop
/// runs at a time.
pub struct DirectoryBackend {
    name: &'static str,
    directory: Arc<dyn DirectoryClient>,
    config: BackendConfig,
    metrics: DiscoveryMetrics,
    running: Mutex<Option<Running>>,
}

impl DirectoryBackend {
    pub fn new(
        name: &'static str,
        directory: Arc<dyn DirectoryClient>,
        config: BackendConfig,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = DiscoveryMetrics::new()
            .map_err(|e| DiscoveryError::InvalidConfiguration(format!("metrics: {}", e)))?;

        Ok(Self {
            name,
            directory,
            config,
            metrics,
            running: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn metrics(&self) -> &DiscoveryMetrics {
        &self.metrics
    }

    /// Spawn the reconciliation loop
    pub async fn start(&self) -> Result<mpsc::Receiver<RouteEvent>> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(DiscoveryError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let state = Arc::new(RegistryState::new());
        let (trigger, requests) = mpsc::channel(1);
        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);

        let registry = DeregistrationRegistry::new(
            state,
            trigger,
            cancel.clone(),
            self.config.deregister_timeout(),
        );
        let reconciler = ReconciliationLoop::new(
            self.directory.clone(),
            &self.config,
            registry.clone(),
            requests,
            events_tx,
            self.metrics.clone(),
            cancel.clone(),
        );

        info!("{}: Watching services", self.name);
        let task = tokio::spawn(reconciler.run());
        *running = Some(Running {
            registry,
            cancel,
            task,
        });

        Ok(events_rx)
    }

    /// Cancel the loop, wait for it to exit and drop all registry state.
    /// Blocked deregistrations return `ShuttingDown`.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            debug!("{}: Stop requested but backend is not running", self.name);
            return Ok(());
        };

        info!("{}: Stopping", self.name);
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!("{}: Reconciliation task ended abnormally: {}", self.name, e);
        }
        running.registry.state().clear().await;
        self.metrics.routes_published.set(0);
        Ok(())
    }

    pub async fn deregister(&self, service: &str) -> Result<()> {
        self.registry().await?.deregister(service).await
    }

    pub async fn deregister_all(&self) -> Result<()> {
        debug!("{}: Deregistering all registered routes", self.name);
        self.registry().await?.deregister_all().await
    }

    /// Names of the routes currently published
    pub async fn registered(&self) -> Vec<String> {
        match self.registry().await {
            Ok(registry) => registry.state().names().await,
            Err(_) => Vec::new(),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    // The lock is released before any rendezvous so stop() is never blocked
    async fn registry(&self) -> Result<DeregistrationRegistry> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.registry.clone())
            .ok_or(DiscoveryError::NotRunning)
    }
}

#[async_trait::async_trait]
impl Backend for DirectoryBackend {
    async fn register(&self, _services: &[String]) -> Result<()> {
        info!("{}: Self registration is not supported", self.name);
        Ok(())
    }

    async fn deregister(&self, service: &str) -> Result<()> {
        DirectoryBackend::deregister(self, service).await
    }

    async fn deregister_all(&self) -> Result<()> {
        DirectoryBackend::deregister_all(self).await
    }

    async fn manual_paths(&self) -> Result<Vec<String>> {
        info!("{}: No implementation for manual paths", self.name);
        Err(DiscoveryError::Unsupported("manual paths"))
    }

    async fn read_manual(&self, path: &str) -> Result<(String, u64)> {
        info!("{}: No implementation for reading manual path {}", self.name, path);
        Err(DiscoveryError::Unsupported("read manual"))
    }

    async fn write_manual(&self, path: &str, _value: &str, _version: u64) -> Result<bool> {
        info!("{}: No implementation for writing manual path {}", self.name, path);
        Err(DiscoveryError::Unsupported("write manual"))
    }

    async fn watch_services(&self) -> Result<mpsc::Receiver<RouteEvent>> {
        self.start().await
    }

    fn watch_manual(&self) -> BoxStream<'static, String> {
        info!("{}: No implementation for watching manual routes", self.name);
        futures::stream::pending().boxed()
    }

    fn watch_no_route_html(&self) -> BoxStream<'static, String> {
        info!("{}: No implementation for watching the no-route page", self.name);
        futures::stream::pending().boxed()
    }

    async fn stop(&self) -> Result<()> {
        DirectoryBackend::stop(self).await
    }
}

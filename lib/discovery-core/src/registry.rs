//! Deregistration registry: one rendezvous handle per published route

use crate::{DiscoveryError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request sent to the reconciliation loop to unpublish a route.
///
/// The loop answers on `done` once the route is gone: `true` if it was
/// published, `false` if it no longer was.
#[derive(Debug)]
pub struct DeregistrationRequest {
    pub service: String,
    pub done: oneshot::Sender<bool>,
}

/// Rendezvous token for a single published route
#[derive(Clone, Debug)]
pub struct DeregistrationHandle {
    service: String,
    trigger: mpsc::Sender<DeregistrationRequest>,
}

impl DeregistrationHandle {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Trigger deregistration and block until the loop acknowledges it.
    async fn rendezvous(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let exchange = async {
            let (done, mut ack) = oneshot::channel();
            let request = DeregistrationRequest {
                service: self.service.clone(),
                done,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::ShuttingDown),
                sent = self.trigger.send(request) => {
                    sent.map_err(|_| DiscoveryError::ShuttingDown)?;
                }
            }

            tokio::select! {
                biased;
                removed = &mut ack => removed.map_err(|_| DiscoveryError::ShuttingDown),
                _ = cancel.cancelled() => Err(DiscoveryError::ShuttingDown),
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| DiscoveryError::DeregistrationTimeout(self.service.clone()))?,
            None => exchange.await,
        }
    }
}

/// Map of route name to deregistration handle.
///
/// A name is present here exactly while its route is published. All access
/// goes through a single lock.
#[derive(Debug, Default)]
pub struct RegistryState {
    handles: Mutex<BTreeMap<String, DeregistrationHandle>>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, service: &str) -> Option<DeregistrationHandle> {
        self.handles.lock().await.get(service).cloned()
    }

    pub async fn contains(&self, service: &str) -> bool {
        self.handles.lock().await.contains_key(service)
    }

    /// Registered names in lexicographic order
    pub async fn names(&self) -> Vec<String> {
        self.handles.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }

    async fn insert(&self, handle: DeregistrationHandle) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.contains_key(&handle.service) {
            return Err(DiscoveryError::AlreadyRegistered(handle.service));
        }
        handles.insert(handle.service.clone(), handle);
        Ok(())
    }

    async fn remove(&self, service: &str) -> Option<DeregistrationHandle> {
        self.handles.lock().await.remove(service)
    }

    pub(crate) async fn clear(&self) {
        self.handles.lock().await.clear();
    }
}

/// Synchronous single and bulk deregistration against the reconciliation loop
#[derive(Clone)]
pub struct DeregistrationRegistry {
    state: Arc<RegistryState>,
    trigger: mpsc::Sender<DeregistrationRequest>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl DeregistrationRegistry {
    pub fn new(
        state: Arc<RegistryState>,
        trigger: mpsc::Sender<DeregistrationRequest>,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            state,
            trigger,
            cancel,
            timeout,
        }
    }

    pub fn state(&self) -> &Arc<RegistryState> {
        &self.state
    }

    /// Create and store the handle for a newly published route
    pub async fn register(&self, service: &str) -> Result<DeregistrationHandle> {
        let handle = DeregistrationHandle {
            service: service.to_string(),
            trigger: self.trigger.clone(),
        };
        self.state.insert(handle.clone()).await?;
        debug!("Registered deregistration handle for {}", service);
        Ok(handle)
    }

    /// Drop the handle of a route the loop has unpublished
    pub async fn release(&self, service: &str) -> bool {
        let released = self.state.remove(service).await.is_some();
        if released {
            debug!("Released deregistration handle for {}", service);
        }
        released
    }

    /// Deregister one route, returning only after it has been unpublished
    pub async fn deregister(&self, service: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::ShuttingDown);
        }

        let Some(handle) = self.state.get(service).await else {
            warn!("Attempted to deregister unknown service {:?}", service);
            return Err(DiscoveryError::UnknownService(service.to_string()));
        };

        info!("Deregistering {:?}", service);
        if handle.rendezvous(&self.cancel, self.timeout).await? {
            Ok(())
        } else {
            warn!("Service {:?} was already unpublished", service);
            Err(DiscoveryError::UnknownService(service.to_string()))
        }
    }

    /// Deregister every route in lexicographic order, one rendezvous at a time
    pub async fn deregister_all(&self) -> Result<()> {
        let names = self.state.names().await;
        debug!("Deregistering all {} registered routes", names.len());

        for name in names {
            match self.deregister(&name).await {
                Ok(()) => {}
                Err(e) if e.is_benign() => debug!("Skipping {:?}: {}", name, e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stands in for the reconciliation loop: unpublishes on request.
    fn spawn_responder(
        state: Arc<RegistryState>,
        mut requests: mpsc::Receiver<DeregistrationRequest>,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut order = Vec::new();
            while let Some(request) = requests.recv().await {
                let removed = state.remove(&request.service).await.is_some();
                if removed {
                    order.push(request.service.clone());
                }
                let _ = request.done.send(removed);
            }
            order
        })
    }

    fn registry(
        timeout: Option<Duration>,
    ) -> (DeregistrationRegistry, mpsc::Receiver<DeregistrationRequest>) {
        let (tx, rx) = mpsc::channel(1);
        let registry = DeregistrationRegistry::new(
            Arc::new(RegistryState::new()),
            tx,
            CancellationToken::new(),
            timeout,
        );
        (registry, rx)
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let (registry, _rx) = registry(None);
        registry.register("default/web").await.unwrap();

        let err = registry.register("default/web").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::AlreadyRegistered(ref s) if s == "default/web"));
        assert_eq!(registry.state().len().await, 1);
    }

    #[tokio::test]
    async fn test_deregister_removes_handle() {
        let (registry, rx) = registry(None);
        registry.register("default/web").await.unwrap();
        let _responder = spawn_responder(registry.state().clone(), rx);

        registry.deregister("default/web").await.unwrap();
        assert!(!registry.state().contains("default/web").await);
    }

    #[tokio::test]
    async fn test_second_deregister_is_unknown() {
        let (registry, rx) = registry(None);
        registry.register("default/web").await.unwrap();
        let _responder = spawn_responder(registry.state().clone(), rx);

        registry.deregister("default/web").await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(1), registry.deregister("default/web"))
            .await
            .expect("second deregister must not block")
            .unwrap_err();
        assert!(err.is_benign());
    }

    #[tokio::test]
    async fn test_deregister_all_is_lexicographic() {
        let (registry, rx) = registry(None);
        for name in ["ns/zeta", "ns/alpha", "ns/mid"] {
            registry.register(name).await.unwrap();
        }
        let responder = spawn_responder(registry.state().clone(), rx);

        registry.deregister_all().await.unwrap();
        assert!(registry.state().is_empty().await);

        drop(registry);
        let order = responder.await.unwrap();
        assert_eq!(order, vec!["ns/alpha", "ns/mid", "ns/zeta"]);
    }

    #[tokio::test]
    async fn test_deregister_times_out_without_ack() {
        let (registry, mut rx) = registry(Some(Duration::from_millis(50)));
        registry.register("default/web").await.unwrap();

        let err = registry.deregister("default/web").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::DeregistrationTimeout(_)));
        assert!(registry.state().contains("default/web").await);

        // the queued request tells the loop nobody is waiting any more
        let request = rx.try_recv().unwrap();
        assert_eq!(request.service, "default/web");
        assert!(request.done.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_deregister() {
        let (registry, _rx) = registry(None);
        registry.register("default/web").await.unwrap();

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.deregister("default/web").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("cancelled deregister must return")
            .unwrap();
        assert!(matches!(result, Err(DiscoveryError::ShuttingDown)));
    }
}

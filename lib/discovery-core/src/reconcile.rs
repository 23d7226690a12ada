//! Reconciliation loop: directory entries in, route events out

use crate::backoff::Backoff;
use crate::config::BackendConfig;
use crate::directory::{DirectoryClient, EntryStream};
use crate::entry::{RouteEvent, RouteEventKind, RouteMapping, ServiceEntry};
use crate::error::FetchError;
use crate::filter::ServiceFilter;
use crate::metrics::DiscoveryMetrics;
use crate::registry::{DeregistrationRegistry, DeregistrationRequest};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Changes needed to move the published route set to the desired one
#[derive(Debug, Default, PartialEq)]
pub struct RouteDiff {
    pub removes: Vec<RouteMapping>,
    pub adds: Vec<RouteMapping>,
}

impl RouteDiff {
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty() && self.adds.is_empty()
    }
}

/// Diff two route sets keyed by service name.
///
/// A mapping whose host or target changed shows up as a remove and an add.
pub fn diff_routes(
    previous: &BTreeMap<String, RouteMapping>,
    desired: &BTreeMap<String, RouteMapping>,
) -> RouteDiff {
    let mut diff = RouteDiff::default();

    for (service, current) in previous {
        match desired.get(service) {
            Some(next) if next == current => {}
            Some(next) => {
                diff.removes.push(current.clone());
                diff.adds.push(next.clone());
            }
            None => diff.removes.push(current.clone()),
        }
    }

    diff.adds.extend(
        desired
            .iter()
            .filter(|(service, _)| !previous.contains_key(*service))
            .map(|(_, mapping)| mapping.clone()),
    );
    diff.adds.sort_by(|a, b| a.service.cmp(&b.service));

    diff
}

/// Background task keeping the proxy's routes in line with the directory
pub struct ReconciliationLoop {
    directory: Arc<dyn DirectoryClient>,
    filter: ServiceFilter,
    registry: DeregistrationRegistry,
    requests: mpsc::Receiver<DeregistrationRequest>,
    events: mpsc::Sender<RouteEvent>,
    metrics: DiscoveryMetrics,
    cancel: CancellationToken,
    backoff: Backoff,
    poll_interval: Duration,
    fetch_timeout: Duration,
    watch: bool,
    published: BTreeMap<String, RouteMapping>,
    // explicitly deregistered, kept off the proxy while still routable
    suppressed: BTreeSet<String>,
}

impl ReconciliationLoop {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        config: &BackendConfig,
        registry: DeregistrationRegistry,
        requests: mpsc::Receiver<DeregistrationRequest>,
        events: mpsc::Sender<RouteEvent>,
        metrics: DiscoveryMetrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            directory,
            filter: ServiceFilter::from_config(config),
            registry,
            requests,
            events,
            metrics,
            cancel,
            backoff: Backoff::new(config.backoff_initial(), config.backoff_max()),
            poll_interval: config.poll_interval(),
            fetch_timeout: config.fetch_timeout(),
            watch: config.watch,
            published: BTreeMap::new(),
            suppressed: BTreeSet::new(),
        }
    }

    /// Run until the cancellation token fires. Dropping the loop closes the
    /// event stream.
    pub async fn run(mut self) {
        info!(
            "Starting reconciliation loop (poll interval {:?})",
            self.poll_interval
        );

        let cancel = self.cancel.clone();
        let mut updates = if self.watch {
            self.directory.watch()
        } else {
            None
        };
        if updates.is_some() {
            info!("Directory push notifications enabled");
        }
        let mut next_poll = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(request) = self.requests.recv() => {
                    self.handle_deregistration(request).await;
                }
                update = next_update(&mut updates) => match update {
                    Some(Ok(entries)) => {
                        self.backoff.reset();
                        self.reconcile(entries).await;
                        next_poll = Instant::now() + self.poll_interval;
                    }
                    Some(Err(e)) => {
                        // the stream backs off on its own; polling keeps running
                        self.metrics.fetch_errors_total.inc();
                        warn!("Directory watch error: {}", e);
                    }
                    None => {
                        warn!("Directory watch ended, falling back to polling");
                        updates = None;
                    }
                },
                _ = tokio::time::sleep_until(next_poll) => {
                    next_poll = Instant::now() + self.poll_once().await;
                }
            }
        }

        info!(
            "Reconciliation loop stopped with {} published routes",
            self.published.len()
        );
    }

    /// Fetch and reconcile once. Returns the delay until the next poll.
    async fn poll_once(&mut self) -> Duration {
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Duration::ZERO,
            fetched = tokio::time::timeout(self.fetch_timeout, self.directory.list()) => fetched,
        };

        let error = match fetched {
            Ok(Ok(entries)) => {
                self.backoff.reset();
                self.reconcile(entries).await;
                return self.poll_interval;
            }
            Ok(Err(e)) => e,
            Err(_) => FetchError::Timeout(self.fetch_timeout),
        };

        self.metrics.fetch_errors_total.inc();
        let delay = self.backoff.next_delay();
        warn!(
            "Directory fetch failed (attempt {}): {}; keeping {} routes, retrying in {:?}",
            self.backoff.failures(),
            error,
            self.published.len(),
            delay
        );
        delay
    }

    /// Run one reconciliation cycle against a fetched entry set
    async fn reconcile(&mut self, entries: Vec<ServiceEntry>) {
        let mut desired = BTreeMap::new();
        for entry in &entries {
            if let Some(mapping) = self.filter.filter(entry) {
                desired.insert(mapping.service.clone(), mapping);
            }
        }

        // Suppression ends once the service stops being routable
        self.suppressed.retain(|service| desired.contains_key(service));
        desired.retain(|service, _| !self.suppressed.contains(service));

        let diff = diff_routes(&self.published, &desired);
        debug!(
            "Reconciling {} entries: {} routable, {} to remove, {} to add",
            entries.len(),
            desired.len(),
            diff.removes.len(),
            diff.adds.len()
        );

        // Removes first so a replaced host is never routed twice
        for mapping in diff.removes {
            self.unpublish(&mapping.service).await;
        }
        for mapping in diff.adds {
            self.publish(mapping).await;
        }

        self.metrics.reconcile_cycles_total.inc();
    }

    async fn handle_deregistration(&mut self, request: DeregistrationRequest) {
        // caller timed out, the route stays published
        if request.done.is_closed() {
            debug!(
                "Ignoring deregistration of {}: caller gave up",
                request.service
            );
            return;
        }

        let removed = self.unpublish(&request.service).await;
        if removed && request.done.is_closed() {
            // unpublished while the caller timed out: let the next cycle
            // restore it instead of suppressing
            debug!(
                "Deregistration of {} was abandoned mid-flight, not suppressing",
                request.service
            );
        } else if removed {
            self.suppressed.insert(request.service.clone());
            self.metrics.deregistrations_total.inc();
        } else {
            // a stale handle must not outlive its route
            self.registry.release(&request.service).await;
        }

        if request.done.send(removed).is_err() {
            debug!(
                "Deregistration of {} completed after its caller gave up",
                request.service
            );
        }
    }

    async fn publish(&mut self, mapping: RouteMapping) {
        if let Err(e) = self.registry.register(&mapping.service).await {
            error!("Refusing to publish {}: {}", mapping.service, e);
            return;
        }

        info!(
            "Adding route {} -> {} for {}",
            mapping.host, mapping.target, mapping.service
        );
        let event = RouteEvent::add(&mapping);
        self.published.insert(mapping.service.clone(), mapping);
        self.metrics.record_event(RouteEventKind::Add);
        self.metrics.routes_published.set(self.published.len() as i64);
        self.emit(event).await;
    }

    async fn unpublish(&mut self, service: &str) -> bool {
        let Some(mapping) = self.published.remove(service) else {
            return false;
        };

        info!(
            "Removing route {} -> {} for {}",
            mapping.host, mapping.target, mapping.service
        );
        self.metrics.record_event(RouteEventKind::Remove);
        self.metrics.routes_published.set(self.published.len() as i64);
        self.emit(RouteEvent::remove(&mapping)).await;
        self.registry.release(service).await;
        true
    }

    async fn emit(&self, event: RouteEvent) {
        let command = event.route_command();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Dropping route event during shutdown: {}", command);
            }
            sent = self.events.send(event) => {
                if sent.is_err() {
                    debug!("Route event receiver closed, dropping: {}", command);
                }
            }
        }
    }
}

async fn next_update(
    updates: &mut Option<EntryStream>,
) -> Option<std::result::Result<Vec<ServiceEntry>, FetchError>> {
    match updates {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

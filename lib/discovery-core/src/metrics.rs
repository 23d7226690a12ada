//! Prometheus metrics for the reconciliation loop

use crate::entry::RouteEventKind;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collected by the discovery backend
#[derive(Clone)]
pub struct DiscoveryMetrics {
    /// Completed reconciliation cycles
    pub reconcile_cycles_total: IntCounter,
    /// Failed directory fetches
    pub fetch_errors_total: IntCounter,
    /// Route events emitted, by kind
    pub route_events_total: IntCounterVec,
    /// Routes currently published
    pub routes_published: IntGauge,
    /// Explicit deregistrations acknowledged by the loop
    pub deregistrations_total: IntCounter,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl DiscoveryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconcile_cycles_total = IntCounter::new(
            "discovery_reconcile_cycles_total",
            "Completed reconciliation cycles",
        )?;
        let fetch_errors_total = IntCounter::new(
            "discovery_fetch_errors_total",
            "Failed directory fetches",
        )?;
        let route_events_total = IntCounterVec::new(
            Opts::new("discovery_route_events_total", "Route events emitted"),
            &["kind"],
        )?;
        let routes_published = IntGauge::new(
            "discovery_routes_published",
            "Routes currently published to the proxy",
        )?;
        let deregistrations_total = IntCounter::new(
            "discovery_deregistrations_total",
            "Explicit deregistrations completed",
        )?;

        registry.register(Box::new(reconcile_cycles_total.clone()))?;
        registry.register(Box::new(fetch_errors_total.clone()))?;
        registry.register(Box::new(route_events_total.clone()))?;
        registry.register(Box::new(routes_published.clone()))?;
        registry.register(Box::new(deregistrations_total.clone()))?;

        Ok(Self {
            reconcile_cycles_total,
            fetch_errors_total,
            route_events_total,
            routes_published,
            deregistrations_total,
            registry,
        })
    }

    pub fn record_event(&self, kind: RouteEventKind) {
        self.route_events_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_text_format() {
        let metrics = DiscoveryMetrics::new().expect("Failed to create metrics");
        metrics.record_event(RouteEventKind::Add);
        metrics.routes_published.set(1);

        let text = metrics.gather().expect("Failed to gather metrics");
        assert!(text.contains("# TYPE discovery_route_events_total counter"));
        assert!(text.contains(r#"discovery_route_events_total{kind="add"} 1"#));
        assert!(text.contains("discovery_routes_published 1"));
    }

    #[test]
    fn test_separate_instances_do_not_collide() {
        let first = DiscoveryMetrics::new().expect("Failed to create metrics");
        let second = DiscoveryMetrics::new().expect("Failed to create metrics");
        first.fetch_errors_total.inc();
        assert_eq!(first.fetch_errors_total.get(), 1);
        assert_eq!(second.fetch_errors_total.get(), 0);
    }
}

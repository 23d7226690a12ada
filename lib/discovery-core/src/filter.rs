//! Inclusion policy and host mapping for directory entries

use crate::config::BackendConfig;
use crate::entry::{RouteMapping, ServiceEntry};

/// Decides which directory entries become routes and what they route to.
///
/// Filtering is pure: the same entry always yields the same result.
#[derive(Clone, Debug)]
pub struct ServiceFilter {
    label_key: String,
    label_value: String,
    domain: String,
}

impl ServiceFilter {
    pub fn new(
        label_key: impl Into<String>,
        label_value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            label_key: label_key.into(),
            label_value: label_value.into(),
            domain: domain.into().trim_matches('.').to_string(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.label_key, &config.label_value, &config.domain)
    }

    /// Whether the entry carries the marker label
    pub fn accepts(&self, entry: &ServiceEntry) -> bool {
        entry
            .labels
            .get(&self.label_key)
            .is_some_and(|value| *value == self.label_value)
    }

    /// Virtual host for an entry: `{name}.{namespace}.{domain}`
    pub fn host_for(&self, entry: &ServiceEntry) -> String {
        format!("{}.{}.{}", entry.name, entry.namespace, self.domain)
    }

    /// Map an entry to its route, or None when the policy excludes it
    pub fn filter(&self, entry: &ServiceEntry) -> Option<RouteMapping> {
        if !self.accepts(entry) {
            return None;
        }
        Some(RouteMapping {
            service: entry.service_id(),
            host: self.host_for(entry),
            target: entry.target.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ServiceFilter {
        ServiceFilter::from_config(&BackendConfig::default())
    }

    #[test]
    fn test_labelled_entry_is_accepted() {
        let entry =
            ServiceEntry::new("web", "default", "10.0.0.1:8080").with_label("fabio", "enabled");
        let mapping = filter().filter(&entry).expect("web should pass the filter");
        assert_eq!(mapping.service, "default/web");
        assert_eq!(mapping.host, "web.default.svc.cluster.local");
        assert_eq!(mapping.target, "10.0.0.1:8080");
    }

    #[test]
    fn test_unlabelled_entry_is_skipped() {
        let entry = ServiceEntry::new("db", "default", "10.0.0.2:5432");
        assert!(filter().filter(&entry).is_none());
    }

    #[test]
    fn test_label_value_must_match() {
        let entry =
            ServiceEntry::new("web", "default", "10.0.0.1:8080").with_label("fabio", "disabled");
        assert!(filter().filter(&entry).is_none());
    }

    #[test]
    fn test_filter_is_deterministic() {
        let entry = ServiceEntry::new("api", "payments", "api.payments.svc.cluster.local:80")
            .with_label("fabio", "enabled")
            .with_label("tier", "backend");
        let f = filter();
        assert_eq!(f.filter(&entry), f.filter(&entry));
    }

    #[test]
    fn test_custom_domain() {
        let f = ServiceFilter::new("expose", "true", ".apps.example.com.");
        let entry = ServiceEntry::new("web", "shop", "10.1.0.4:80").with_label("expose", "true");
        assert_eq!(
            f.filter(&entry).map(|m| m.host),
            Some("web.shop.apps.example.com".to_string())
        );
    }
}

//! Backend configuration

use crate::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the discovery backend
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendConfig {
    /// Label a service must carry to be routed
    pub label_key: String,
    /// Required value of `label_key`
    pub label_value: String,
    /// Domain appended to `{name}.{namespace}` to build the virtual host
    pub domain: String,
    /// Interval between reconciliation cycles
    pub poll_interval_secs: u64,
    /// Deadline for a single directory fetch
    pub fetch_timeout_secs: u64,
    /// First delay after a failed fetch
    pub backoff_initial_ms: u64,
    /// Upper bound for the fetch retry delay
    pub backoff_max_secs: u64,
    /// How long a deregistration waits for acknowledgment. None waits until shutdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregister_timeout_secs: Option<u64>,
    /// Capacity of the outbound route event channel
    pub event_buffer: usize,
    /// Use the directory's push notifications when it offers them
    pub watch: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            label_key: "fabio".to_string(),
            label_value: "enabled".to_string(),
            domain: "svc.cluster.local".to_string(),
            poll_interval_secs: 30,
            fetch_timeout_secs: 10,
            backoff_initial_ms: 1000,
            backoff_max_secs: 30,
            deregister_timeout_secs: None,
            event_buffer: 1024,
            watch: true,
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.label_key.is_empty() {
            return Err(DiscoveryError::InvalidConfiguration(
                "labelKey must not be empty".to_string(),
            ));
        }
        if self.domain.trim_matches('.').is_empty() {
            return Err(DiscoveryError::InvalidConfiguration(
                "domain must not be empty".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(DiscoveryError::InvalidConfiguration(
                "pollIntervalSecs must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(DiscoveryError::InvalidConfiguration(
                "eventBuffer must be greater than zero".to_string(),
            ));
        }
        if self.backoff_initial() > self.backoff_max() {
            return Err(DiscoveryError::InvalidConfiguration(format!(
                "backoffInitialMs ({}) exceeds backoffMaxSecs ({})",
                self.backoff_initial_ms, self.backoff_max_secs
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn deregister_timeout(&self) -> Option<Duration> {
        self.deregister_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.label_key, "fabio");
        assert_eq!(config.label_value, "enabled");
        assert_eq!(config.domain, "svc.cluster.local");
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.backoff_initial(), Duration::from_secs(1));
        assert_eq!(config.backoff_max(), Duration::from_secs(30));
        assert!(config.deregister_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"labelKey": "expose", "pollIntervalSecs": 5}"#).unwrap();
        assert_eq!(config.label_key, "expose");
        assert_eq!(config.label_value, "enabled");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BackendConfig::default();
        config.poll_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(DiscoveryError::InvalidConfiguration(_))
        ));

        let mut config = BackendConfig::default();
        config.backoff_initial_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = BackendConfig::default();
        config.domain = ".".to_string();
        assert!(config.validate().is_err());
    }
}

//! Daemon settings: YAML file plus environment overrides

use anyhow::{anyhow, Context, Result};
use discovery_core::BackendConfig;
use discovery_kube::{KubernetesConfig, TargetMode};
use serde::Deserialize;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub backend: BackendConfig,
    pub kubernetes: KubernetesConfig,
    pub admin_addr: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            kubernetes: KubernetesConfig::default(),
            admin_addr: ([0, 0, 0, 0], 9998).into(),
        }
    }
}

impl Settings {
    /// Load from the file named by DISCOVERY_CONFIG (if any), then apply
    /// DISCOVERY_* environment overrides
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var("DISCOVERY_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading settings from {}", path))?;
                Self::from_yaml(&text).with_context(|| format!("parsing {}", path))?
            }
            Err(_) => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.backend.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("DISCOVERY_LABEL_KEY") {
            self.backend.label_key = value;
        }
        if let Some(value) = lookup("DISCOVERY_LABEL_VALUE") {
            self.backend.label_value = value;
        }
        if let Some(value) = lookup("DISCOVERY_DOMAIN") {
            self.backend.domain = value;
        }
        if let Some(value) = lookup("DISCOVERY_POLL_INTERVAL_SECS") {
            self.backend.poll_interval_secs = parse("DISCOVERY_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("DISCOVERY_FETCH_TIMEOUT_SECS") {
            self.backend.fetch_timeout_secs = parse("DISCOVERY_FETCH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("DISCOVERY_DEREGISTER_TIMEOUT_SECS") {
            self.backend.deregister_timeout_secs =
                Some(parse("DISCOVERY_DEREGISTER_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("DISCOVERY_WATCH") {
            self.backend.watch = parse("DISCOVERY_WATCH", &value)?;
        }
        if let Some(value) = lookup("DISCOVERY_NAMESPACE") {
            self.kubernetes.namespace = Some(value).filter(|ns| !ns.is_empty());
        }
        if let Some(value) = lookup("DISCOVERY_CLUSTER_DOMAIN") {
            self.kubernetes.cluster_domain = value;
        }
        if let Some(value) = lookup("DISCOVERY_TARGET_MODE") {
            self.kubernetes.target_mode = match value.as_str() {
                "dns" => TargetMode::Dns,
                "clusterIp" | "cluster-ip" => TargetMode::ClusterIp,
                other => return Err(anyhow!("DISCOVERY_TARGET_MODE: unknown mode {:?}", other)),
            };
        }
        if let Some(value) = lookup("DISCOVERY_PORT_NAME") {
            self.kubernetes.port_name = Some(value);
        }
        if let Some(value) = lookup("DISCOVERY_ADMIN_ADDR") {
            self.admin_addr = parse("DISCOVERY_ADMIN_ADDR", &value)?;
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| anyhow!("{}: invalid value {:?}: {}", key, value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_yaml_settings() {
        let settings = Settings::from_yaml(
            r#"
backend:
  labelKey: expose
  domain: apps.example.com
  pollIntervalSecs: 15
kubernetes:
  namespace: shop
  targetMode: clusterIp
adminAddr: 127.0.0.1:9000
"#,
        )
        .unwrap();
        assert_eq!(settings.backend.label_key, "expose");
        assert_eq!(settings.backend.label_value, "enabled");
        assert_eq!(settings.backend.poll_interval_secs, 15);
        assert_eq!(settings.kubernetes.namespace.as_deref(), Some("shop"));
        assert_eq!(settings.kubernetes.target_mode, TargetMode::ClusterIp);
        assert_eq!(settings.admin_addr.port(), 9000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DISCOVERY_LABEL_VALUE", "yes"),
            ("DISCOVERY_DEREGISTER_TIMEOUT_SECS", "5"),
            ("DISCOVERY_WATCH", "false"),
            ("DISCOVERY_TARGET_MODE", "cluster-ip"),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.backend.label_value, "yes");
        assert_eq!(settings.backend.deregister_timeout_secs, Some(5));
        assert!(!settings.backend.watch);
        assert_eq!(settings.kubernetes.target_mode, TargetMode::ClusterIp);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(|key| (key == "DISCOVERY_POLL_INTERVAL_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DISCOVERY_POLL_INTERVAL_SECS"));
    }
}

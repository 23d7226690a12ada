//! Kubernetes service directory for route discovery
pub mod client;
pub mod config;
pub mod discovery;

pub use client::KubernetesClient;
pub use config::{KubernetesConfig, TargetMode};
pub use discovery::{service_entry, KubernetesDirectory};

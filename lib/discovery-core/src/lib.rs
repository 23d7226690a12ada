//! Directory-driven route discovery for the proxy
//!
//! This library provides:
//! - Filtering of directory entries into host mappings
//! - A reconciliation loop publishing incremental route events
//! - Synchronous deregistration with a rendezvous guarantee
//! - The backend facade the proxy drives

pub mod backend;
pub mod backoff;
pub mod config;
pub mod directory;
pub mod entry;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod reconcile;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, DirectoryBackend};
pub use config::BackendConfig;
pub use directory::{DirectoryClient, EntryStream};
pub use entry::{RouteEvent, RouteEventKind, RouteMapping, ServiceEntry};
pub use error::{DiscoveryError, FetchError, Result};
pub use filter::ServiceFilter;
pub use metrics::DiscoveryMetrics;
pub use registry::{DeregistrationRegistry, RegistryState};

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// A name was registered twice without being released in between.
    /// This points at a bug in the diff step, not at a caller mistake.
    #[error("Service already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Deregistration of {0} timed out")]
    DeregistrationTimeout(String),

    #[error("Discovery backend is shutting down")]
    ShuttingDown,

    #[error("Discovery backend is already running")]
    AlreadyRunning,

    #[error("Discovery backend is not running")]
    NotRunning,

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Directory fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

impl DiscoveryError {
    /// Errors a caller can safely ignore, such as deregistering a service
    /// that is already gone.
    pub fn is_benign(&self) -> bool {
        matches!(self, DiscoveryError::UnknownService(_))
    }
}

/// Failure to read the service directory. Always transient from the
/// reconciliation loop's point of view.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("directory request timed out after {0:?}")]
    Timeout(Duration),

    #[error("directory client error: {0}")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("directory watch error: {0}")]
    Watch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_service_is_benign() {
        assert!(DiscoveryError::UnknownService("default/web".to_string()).is_benign());
        assert!(!DiscoveryError::ShuttingDown.is_benign());
        assert!(!DiscoveryError::DeregistrationTimeout("default/web".to_string()).is_benign());
    }

    #[test]
    fn test_fetch_error_converts() {
        let err: DiscoveryError = FetchError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(err, DiscoveryError::Fetch(FetchError::Timeout(_))));
        assert!(err.to_string().contains("timed out"));
    }
}

//! Boundary to the external service directory

use crate::entry::ServiceEntry;
use crate::error::FetchError;
use futures::stream::BoxStream;

/// Stream of complete entry sets pushed by the directory
pub type EntryStream = BoxStream<'static, std::result::Result<Vec<ServiceEntry>, FetchError>>;

/// Read-only access to the service directory.
///
/// Implementations must be safe to call concurrently; the reconciliation
/// loop treats them as stateless.
#[async_trait::async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch the current set of services
    async fn list(&self) -> std::result::Result<Vec<ServiceEntry>, FetchError>;

    /// Optional push channel. Each item is the full current entry set.
    fn watch(&self) -> Option<EntryStream> {
        None
    }
}

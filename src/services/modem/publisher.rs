use async_trait::async_trait;
use tracing::debug;

use super::PublishedObject;

/// Export capability consumed from the object-exposure layer.
///
/// The service announces entity lifecycle through this trait; what
/// "publishing" means on the wire (D-Bus object registration, RPC
/// advertisement, ...) is the collaborator's business.
#[async_trait]
pub trait ObjectPublisher: Send + Sync {
    /// Announce a newly available object.
    async fn publish(&self, object: PublishedObject);

    /// Withdraw a previously published object.
    async fn unpublish(&self, object: PublishedObject);
}

/// Publisher that drops every announcement.
///
/// Useful for embedders that only consume the event stream, and for tests.
pub struct NullPublisher;

#[async_trait]
impl ObjectPublisher for NullPublisher {
    async fn publish(&self, object: PublishedObject) {
        debug!("Publish (no-op): {object:?}");
    }

    async fn unpublish(&self, object: PublishedObject) {
        debug!("Unpublish (no-op): {object:?}");
    }
}

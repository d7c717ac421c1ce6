use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ProviderError;
use crate::media::{DeliveryReceipt, RemoteMedia};

/// Strongly-typed delivery capability with native `async fn`.
///
/// Not object-safe; use [`DynDeliverer`] for dynamic dispatch. Every
/// `Deliverer` implements `DynDeliverer` via a blanket implementation.
pub trait Deliverer: Send + Sync {
    /// Returns the unique name of this deliverer.
    fn name(&self) -> &str;

    /// Deliver one media file to a destination.
    ///
    /// `media` carries the classification and filename the destination may
    /// use to pick its upload method; `caption` is optional display text.
    fn deliver(
        &self,
        destination: &str,
        media: &RemoteMedia,
        content: Bytes,
        caption: Option<&str>,
    ) -> impl std::future::Future<Output = Result<DeliveryReceipt, ProviderError>> + Send;
}

/// Object-safe delivery capability for use behind `Arc<dyn DynDeliverer>`.
#[async_trait]
pub trait DynDeliverer: Send + Sync {
    /// Returns the unique name of this deliverer.
    fn name(&self) -> &str;

    /// Deliver one media file to a destination.
    async fn deliver(
        &self,
        destination: &str,
        media: &RemoteMedia,
        content: Bytes,
        caption: Option<&str>,
    ) -> Result<DeliveryReceipt, ProviderError>;
}

/// Blanket implementation bridging the static and dynamic dispatch worlds.
#[async_trait]
impl<T: Deliverer + Sync> DynDeliverer for T {
    fn name(&self) -> &str {
        Deliverer::name(self)
    }

    async fn deliver(
        &self,
        destination: &str,
        media: &RemoteMedia,
        content: Bytes,
        caption: Option<&str>,
    ) -> Result<DeliveryReceipt, ProviderError> {
        Deliverer::deliver(self, destination, media, content, caption).await
    }
}

use async_trait::async_trait;
use bytes::Bytes;

use ferry_core::Session;

use crate::error::ProviderError;
use crate::media::RemoteMedia;

/// Strongly-typed content fetch capability with native `async fn`.
///
/// This trait is **not** object-safe because it uses native `async fn`
/// methods (which desugar to opaque `impl Future` return types). If you
/// need dynamic dispatch, use [`DynFetcher`] instead -- every `Fetcher`
/// automatically implements `DynFetcher` via a blanket implementation.
///
/// The fetcher may read the borrowed session's credential payload but must
/// not mutate it; last-used bookkeeping is the session manager's concern.
pub trait Fetcher: Send + Sync {
    /// Returns the unique name of this fetcher.
    fn name(&self) -> &str;

    /// Expand a content reference into its ordered list of media files.
    fn resolve(
        &self,
        reference: &str,
        session: Option<&Session>,
    ) -> impl std::future::Future<Output = Result<Vec<RemoteMedia>, ProviderError>> + Send;

    /// Retrieve the content of one media file.
    fn fetch(
        &self,
        media: &RemoteMedia,
        session: Option<&Session>,
    ) -> impl std::future::Future<Output = Result<Bytes, ProviderError>> + Send;
}

/// Object-safe fetch capability for use behind `Arc<dyn DynFetcher>`.
///
/// Uses [`macro@async_trait`] to enable dynamic dispatch of async methods.
/// You generally should not implement this trait directly -- instead
/// implement [`Fetcher`] and rely on the blanket implementation.
#[async_trait]
pub trait DynFetcher: Send + Sync {
    /// Returns the unique name of this fetcher.
    fn name(&self) -> &str;

    /// Expand a content reference into its ordered list of media files.
    async fn resolve(
        &self,
        reference: &str,
        session: Option<&Session>,
    ) -> Result<Vec<RemoteMedia>, ProviderError>;

    /// Retrieve the content of one media file.
    async fn fetch(
        &self,
        media: &RemoteMedia,
        session: Option<&Session>,
    ) -> Result<Bytes, ProviderError>;
}

/// Blanket implementation bridging the static and dynamic dispatch worlds.
#[async_trait]
impl<T: Fetcher + Sync> DynFetcher for T {
    fn name(&self) -> &str {
        Fetcher::name(self)
    }

    async fn resolve(
        &self,
        reference: &str,
        session: Option<&Session>,
    ) -> Result<Vec<RemoteMedia>, ProviderError> {
        Fetcher::resolve(self, reference, session).await
    }

    async fn fetch(
        &self,
        media: &RemoteMedia,
        session: Option<&Session>,
    ) -> Result<Bytes, ProviderError> {
        Fetcher::fetch(self, media, session).await
    }
}

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::media::Validation;

/// Strongly-typed credential validation capability with native `async fn`.
///
/// Not object-safe; use [`DynCredentialValidator`] for dynamic dispatch.
pub trait CredentialValidator: Send + Sync {
    /// Returns the unique name of this validator.
    fn name(&self) -> &str;

    /// Check a credential payload against the upstream.
    ///
    /// A rejected credential is a successful validation call with
    /// `valid == false`; `Err` is reserved for the check itself failing
    /// (network trouble, misconfiguration).
    fn validate(
        &self,
        payload: &[u8],
    ) -> impl std::future::Future<Output = Result<Validation, ProviderError>> + Send;
}

/// Object-safe credential validation capability.
#[async_trait]
pub trait DynCredentialValidator: Send + Sync {
    /// Returns the unique name of this validator.
    fn name(&self) -> &str;

    /// Check a credential payload against the upstream.
    async fn validate(&self, payload: &[u8]) -> Result<Validation, ProviderError>;
}

/// Blanket implementation bridging the static and dynamic dispatch worlds.
#[async_trait]
impl<T: CredentialValidator + Sync> DynCredentialValidator for T {
    fn name(&self) -> &str {
        CredentialValidator::name(self)
    }

    async fn validate(&self, payload: &[u8]) -> Result<Validation, ProviderError> {
        CredentialValidator::validate(self, payload).await
    }
}

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during fetch, delivery, or validation operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The referenced content does not exist, is private, or was deleted.
    #[error("content not found: {0}")]
    ContentNotFound(String),

    /// The upstream requires an authenticated session for this content.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The supplied session was rejected by the upstream.
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// The operation failed at the upstream or destination.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The call did not complete within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The capability was given invalid configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The remote end rejected the request due to rate limiting, with an
    /// optional server-provided retry hint.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ProviderError {
    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited { .. }
        )
    }
}

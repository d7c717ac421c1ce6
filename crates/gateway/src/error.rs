use thiserror::Error;

/// Errors surfaced directly to callers of the orchestrator and its
/// administrative operations.
///
/// Per-item transfer failures are not errors at this level: they are
/// absorbed into item terminal states and reported through the job report.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An error occurred in the state store.
    #[error("state error: {0}")]
    State(#[from] ferry_state::StateError),

    /// An error from a capability operation surfaced outside item
    /// processing (e.g. a validator transport failure).
    #[error("provider error: {0}")]
    Provider(#[from] ferry_provider::ProviderError),

    /// No usable session exists for a scope whose content requires
    /// authentication.
    #[error("no active session for scope: {0}")]
    NoActiveSession(String),

    /// The requested job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The requested session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A staging filesystem operation failed.
    #[error("staging error: {0}")]
    Staging(#[from] std::io::Error),

    /// The orchestrator was misconfigured (e.g. missing required
    /// components or invalid limiter/breaker settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A background processing task failed unexpectedly.
    #[error("task failure: {0}")]
    Task(String),
}

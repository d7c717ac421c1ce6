//! Job orchestration, resilience guards, and session management for the
//! Ferry media relay.
//!
//! The [`Orchestrator`] turns one submitted content reference into a
//! tracked multi-file job: expansion through the [`RetrievalGateway`],
//! per-item fetch into local [`staging`], and in-order delivery through
//! the [`DeliveryGateway`]. Both gateways carry their own token-bucket
//! [`rate_limiter`] and tri-state [`circuit_breaker`], with retry policy
//! from `ferry-executor`; the orchestrator itself never retries.

pub mod builder;
pub mod circuit_breaker;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limiter;
pub mod sessions;
pub mod staging;
pub mod transfer;

pub use builder::OrchestratorBuilder;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::GatewayError;
pub use jobs::JobStore;
pub use metrics::{MetricsSnapshot, OrchestratorMetrics};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use rate_limiter::{Admission, RateLimiter, RateLimiterConfig};
pub use sessions::{SessionConfig, SessionManager, SubmissionSlot, ValidateOutcome};
pub use staging::{CleanupReport, StagingArea, StagingHandle};
pub use transfer::{DeliveryGateway, RetrievalGateway, TransferConfig, TransferFailure};

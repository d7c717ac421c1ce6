use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use ferry_core::Session;
use ferry_executor::ExecutorConfig;
use ferry_provider::{DeliveryReceipt, DynDeliverer, DynFetcher, ProviderError, RemoteMedia};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::GatewayError;
use crate::rate_limiter::{Admission, RateLimiter, RateLimiterConfig};

/// Terminal failure of a guarded transfer call, absorbed into the owning
/// item's state by the orchestrator — never surfaced as a process error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    /// The local rate limiter rejected every attempt in the budget.
    RateLimited { retry_after: Duration },
    /// The circuit breaker is open; the call was not attempted.
    BreakerOpen,
    /// The external call failed after `attempts` tries.
    Upstream {
        cause: String,
        retryable: bool,
        attempts: u32,
    },
}

impl TransferFailure {
    /// Human-readable cause recorded on the failed item.
    #[must_use]
    pub fn cause(&self) -> String {
        match self {
            Self::RateLimited { retry_after } => {
                format!("rate limited (retry after {retry_after:?})")
            }
            Self::BreakerOpen => "upstream unavailable (circuit open)".to_owned(),
            Self::Upstream { cause, attempts, .. } => {
                format!("{cause} (after {attempts} attempts)")
            }
        }
    }
}

impl std::fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cause())
    }
}

/// Settings for one gateway: its limiter, breaker, and retry budget.
#[derive(Debug, Clone, Default)]
pub struct TransferConfig {
    /// Token-bucket admission control per resource class.
    pub rate_limiter: RateLimiterConfig,
    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry and timeout budget for external calls.
    pub executor: ExecutorConfig,
}

/// The breaker+limiter+retry core shared by both gateways.
///
/// Call sequence per attempt: rate-limiter admission (a rejection never
/// touches the breaker), breaker gate, then the external call under the
/// configured timeout with its outcome reported back to the breaker.
/// Retryable failures sleep per the retry strategy; admission rejections
/// sleep the returned `retry_after` (the limiter's cooperative-wait
/// contract). Each sleep consumes one attempt from the budget.
struct TransferGuard {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    config: ExecutorConfig,
}

impl TransferGuard {
    fn new(name: &str, config: TransferConfig) -> Result<Self, GatewayError> {
        config
            .circuit_breaker
            .validate()
            .map_err(|e| GatewayError::Configuration(format!("{name} breaker: {e}")))?;
        config
            .executor
            .validate()
            .map_err(|e| GatewayError::Configuration(format!("{name} executor: {e}")))?;
        let limiter = RateLimiter::new(config.rate_limiter)
            .map_err(|e| GatewayError::Configuration(format!("{name} rate limiter: {e}")))?;
        Ok(Self {
            breaker: CircuitBreaker::new(name, config.circuit_breaker),
            limiter,
            config: config.executor,
        })
    }

    async fn run<T, F, Fut>(&self, class: &str, mut op: F) -> Result<T, TransferFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.config.max_attempts;

        for attempt in 0..max_attempts {
            let last = attempt + 1 == max_attempts;

            match self.limiter.admit(class) {
                Admission::Granted => {}
                Admission::Rejected { retry_after } => {
                    if last {
                        return Err(TransferFailure::RateLimited { retry_after });
                    }
                    debug!(class, attempt, ?retry_after, "admission rejected, waiting");
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
            }

            if self.breaker.check() == CircuitState::Open {
                return Err(TransferFailure::BreakerOpen);
            }

            let result = tokio::time::timeout(self.config.call_timeout, op()).await;
            let err = match result {
                Ok(Ok(value)) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_elapsed) => ProviderError::Timeout(self.config.call_timeout),
            };

            self.breaker.record_failure();

            if err.is_retryable() && !last {
                // Prefer the upstream's own retry hint over the backoff curve.
                let delay = match &err {
                    ProviderError::RateLimited {
                        retry_after: Some(hint),
                    } => *hint,
                    _ => self.config.retry_strategy.delay_for(attempt),
                };
                warn!(
                    class,
                    attempt,
                    error = %err,
                    ?delay,
                    "retryable transfer error, will retry"
                );
                tokio::time::sleep(delay).await;
            } else {
                warn!(
                    class,
                    attempt,
                    error = %err,
                    retryable = err.is_retryable(),
                    "transfer failed"
                );
                return Err(TransferFailure::Upstream {
                    cause: err.to_string(),
                    retryable: err.is_retryable(),
                    attempts: attempt + 1,
                });
            }
        }

        // max_attempts >= 1 is enforced at construction; every final
        // attempt returns above.
        Err(TransferFailure::Upstream {
            cause: "retry budget exhausted".to_owned(),
            retryable: true,
            attempts: max_attempts,
        })
    }
}

/// Gateway to the upstream content source.
pub struct RetrievalGateway {
    fetcher: Arc<dyn DynFetcher>,
    guard: TransferGuard,
}

impl RetrievalGateway {
    /// Wrap a fetch capability with its own limiter, breaker, and retry
    /// budget. Fails fast on invalid configuration.
    pub fn new(fetcher: Arc<dyn DynFetcher>, config: TransferConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            guard: TransferGuard::new("retrieval", config)?,
            fetcher,
        })
    }

    /// Expand a content reference into its ordered media list.
    #[instrument(skip_all, fields(reference = %reference))]
    pub async fn resolve(
        &self,
        reference: &str,
        session: Option<&Session>,
    ) -> Result<Vec<RemoteMedia>, TransferFailure> {
        self.guard
            .run("resolve", || self.fetcher.resolve(reference, session))
            .await
    }

    /// Retrieve the content of one media file.
    #[instrument(skip_all, fields(handle = %media.handle))]
    pub async fn fetch(
        &self,
        media: &RemoteMedia,
        session: Option<&Session>,
    ) -> Result<Bytes, TransferFailure> {
        self.guard
            .run("fetch", || self.fetcher.fetch(media, session))
            .await
    }

    /// The breaker guarding the upstream, for introspection.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.guard.breaker
    }
}

impl std::fmt::Debug for RetrievalGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalGateway")
            .field("fetcher", &self.fetcher.name())
            .field("breaker", &self.guard.breaker)
            .finish_non_exhaustive()
    }
}

/// Gateway to the messaging destination.
pub struct DeliveryGateway {
    deliverer: Arc<dyn DynDeliverer>,
    guard: TransferGuard,
}

impl DeliveryGateway {
    /// Wrap a delivery capability with its own limiter, breaker, and retry
    /// budget — independent of the retrieval gateway's, since upstream and
    /// destination have separate failure domains.
    pub fn new(
        deliverer: Arc<dyn DynDeliverer>,
        config: TransferConfig,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            guard: TransferGuard::new("delivery", config)?,
            deliverer,
        })
    }

    /// Deliver one staged media file to the destination.
    #[instrument(skip_all, fields(destination = %destination, handle = %media.handle))]
    pub async fn send(
        &self,
        destination: &str,
        media: &RemoteMedia,
        content: Bytes,
        caption: Option<&str>,
    ) -> Result<DeliveryReceipt, TransferFailure> {
        self.guard
            .run("deliver", || {
                self.deliverer
                    .deliver(destination, media, content.clone(), caption)
            })
            .await
    }

    /// The breaker guarding the destination, for introspection.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.guard.breaker
    }
}

impl std::fmt::Debug for DeliveryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryGateway")
            .field("deliverer", &self.deliverer.name())
            .field("breaker", &self.guard.breaker)
            .finish_non_exhaustive()
    }
}

use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — calls flow through.
    Closed,
    /// The guarded endpoint is failing — calls are rejected immediately.
    Open,
    /// Recovery probe — a single trial call is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Number of consecutive successes in `HalfOpen` state to close the
    /// circuit. Defaults to 1: a single trial success closes.
    pub success_threshold: u32,
    /// How long to wait in `Open` state before allowing a trial call.
    pub recovery_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Validate configuration values.
    ///
    /// Returns `Err` with a description if any value is invalid:
    /// - `failure_threshold` must be >= 1
    /// - `success_threshold` must be >= 1
    ///
    /// `recovery_timeout = 0` is intentionally allowed (useful for testing).
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold < 1 {
            return Err("failure_threshold must be >= 1".into());
        }
        if self.success_threshold < 1 {
            return Err("success_threshold must be >= 1".into());
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Internal mutable state for a single circuit breaker.
struct CircuitData {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<Instant>,
    /// Whether a probe request is currently in flight during `HalfOpen`
    /// state. Only one probe is admitted at a time; concurrent callers are
    /// rejected as if the circuit were open.
    probe_in_flight: bool,
}

impl CircuitData {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker guarding one gateway's external endpoint.
///
/// The breaker does not invoke the wrapped operation itself; the caller
/// gates on [`check`](Self::check) and reports each result back through
/// [`record_success`](Self::record_success) /
/// [`record_failure`](Self::record_failure). Transitions:
/// - `Closed` -> `Open` when consecutive failures reach the threshold
/// - `Open` -> `HalfOpen` after the recovery timeout elapses
/// - `HalfOpen` -> `Closed` after enough successful probes
/// - `HalfOpen` -> `Open` on any probe failure
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    data: RwLock<CircuitData>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given display name.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            data: RwLock::new(CircuitData::new()),
        }
    }

    /// Check if a call should be allowed through.
    ///
    /// This may trigger a transition from `Open` to `HalfOpen` if the
    /// recovery timeout has elapsed. In `HalfOpen` state, only one probe
    /// call is allowed at a time.
    ///
    /// Returns the effective state for this caller: `Open` means "do not
    /// call", `Closed` and `HalfOpen` mean "proceed".
    pub fn check(&self) -> CircuitState {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if data.state == CircuitState::Open
            && let Some(last_failure) = data.last_failure_time
            && last_failure.elapsed() >= self.config.recovery_timeout
        {
            debug!(
                breaker = %self.name,
                "circuit breaker transitioning from open to half-open"
            );
            data.state = CircuitState::HalfOpen;
            data.consecutive_successes = 0;
            data.probe_in_flight = true;
            return CircuitState::HalfOpen;
        }

        // In HalfOpen state, reject if a probe is already in flight.
        if data.state == CircuitState::HalfOpen && data.probe_in_flight {
            return CircuitState::Open;
        }

        // In HalfOpen state with no probe in flight, allow the next probe.
        if data.state == CircuitState::HalfOpen {
            data.probe_in_flight = true;
        }

        data.state
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match data.state {
            CircuitState::HalfOpen => {
                data.consecutive_successes += 1;
                data.probe_in_flight = false;
                if data.consecutive_successes >= self.config.success_threshold {
                    info!(
                        breaker = %self.name,
                        successes = data.consecutive_successes,
                        "circuit breaker closing after successful probes"
                    );
                    data.state = CircuitState::Closed;
                    data.consecutive_failures = 0;
                    data.consecutive_successes = 0;
                }
            }
            CircuitState::Closed => {
                data.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match data.state {
            CircuitState::Closed => {
                data.consecutive_failures += 1;
                data.last_failure_time = Some(Instant::now());
                if data.consecutive_failures >= self.config.failure_threshold {
                    info!(
                        breaker = %self.name,
                        failures = data.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opening"
                    );
                    data.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    breaker = %self.name,
                    "circuit breaker re-opening after half-open probe failure"
                );
                data.state = CircuitState::Open;
                data.last_failure_time = Some(Instant::now());
                data.consecutive_successes = 0;
                data.probe_in_flight = false;
            }
            CircuitState::Open => {
                data.last_failure_time = Some(Instant::now());
            }
        }
    }

    /// Get current state without triggering transitions.
    pub fn state(&self) -> CircuitState {
        self.data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .state
    }

    /// Get the configuration for this circuit breaker.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the breaker's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reset the circuit breaker to `Closed` state.
    pub fn reset(&self) {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *data = CircuitData::new();
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self
            .data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &data.state)
            .field("consecutive_failures", &data.consecutive_failures)
            .field("consecutive_successes", &data.consecutive_successes)
            .finish_non_exhaustive()
    }
}

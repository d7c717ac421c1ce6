use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// One token was consumed; the call may proceed.
    Granted,
    /// No token available. `retry_after` is the computed time until one
    /// token accrues; callers needing blocking behavior loop on it as
    /// their own cooperative-wait contract.
    Rejected { retry_after: Duration },
}

impl Admission {
    /// Whether the admission was granted.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Token-bucket configuration shared by every resource class of one
/// limiter instance.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens a bucket can hold. Zero is legal and always rejects.
    pub capacity: u32,
    /// Tokens accrued per second. Must be positive and finite.
    pub refill_per_sec: f64,
}

impl RateLimiterConfig {
    /// Validate configuration values.
    ///
    /// Returns `Err` with a description if the refill rate is zero,
    /// negative, or not finite. A zero capacity is intentionally allowed
    /// (an always-closed valve).
    pub fn validate(&self) -> Result<(), String> {
        if !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            return Err("refill_per_sec must be positive and finite".into());
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 1.0,
        }
    }
}

/// Mutable per-class bucket state.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Non-blocking token-bucket rate limiter partitioned by resource class.
///
/// Each class gets an independent bucket, created full on first use.
/// Refill is computed lazily from elapsed time at each admission check —
/// no background timer. `admit` never blocks; it returns an immediate
/// decision.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation message if the configuration is invalid
    /// (fail-fast at construction, never at admission time).
    pub fn new(config: RateLimiterConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// Check admission for one call in the given resource class,
    /// consuming a token when available.
    pub fn admit(&self, class: &str) -> Admission {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(class.to_owned()).or_insert_with(|| Bucket {
            tokens: f64::from(self.config.capacity),
            last_refill: now,
        });

        // Lazy refill from elapsed time, clamped to capacity.
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.config.refill_per_sec)
            .min(f64::from(self.config.capacity));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission::Granted
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after = Duration::from_secs_f64(deficit / self.config.refill_per_sec);
            debug!(class, ?retry_after, "rate limited");
            Admission::Rejected { retry_after }
        }
    }

    /// The limiter's configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

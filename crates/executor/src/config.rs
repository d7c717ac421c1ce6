use std::time::Duration;

use crate::retry::RetryStrategy;

/// Retry and timeout budget for one gateway's external calls.
///
/// # Examples
///
/// ```
/// use ferry_executor::ExecutorConfig;
///
/// let config = ExecutorConfig::default();
/// assert_eq!(config.max_attempts, 4);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Total number of attempts (initial call plus retries) before a call
    /// is considered failed. Must be at least 1.
    pub max_attempts: u32,
    /// Strategy used to compute the delay between attempts.
    pub retry_strategy: RetryStrategy,
    /// Maximum wall-clock time allowed for a single external call.
    pub call_timeout: Duration,
}

impl ExecutorConfig {
    /// Validate configuration values.
    ///
    /// Returns `Err` with a description if `max_attempts` is zero or the
    /// call timeout is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be >= 1".into());
        }
        if self.call_timeout.is_zero() {
            return Err("call_timeout must be non-zero".into());
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retry_strategy: RetryStrategy::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking orchestration outcomes.
///
/// All counters use relaxed ordering for maximum throughput. For a
/// consistent point-in-time view, call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    /// Jobs accepted for processing.
    pub jobs_submitted: AtomicU64,
    /// Jobs that completed with every item delivered.
    pub jobs_completed: AtomicU64,
    /// Jobs that finished with a mix of delivered and failed items.
    pub jobs_partially_failed: AtomicU64,
    /// Jobs that finished with no item delivered, or failed fatally.
    pub jobs_failed: AtomicU64,
    /// Jobs cancelled by their submitter.
    pub jobs_cancelled: AtomicU64,
    /// Items fetched successfully.
    pub items_fetched: AtomicU64,
    /// Items delivered successfully.
    pub items_delivered: AtomicU64,
    /// Item fetch attempts that ended in terminal failure.
    pub fetch_failures: AtomicU64,
    /// Item delivery attempts that ended in terminal failure.
    pub delivery_failures: AtomicU64,
    /// Transfers rejected by a rate limiter after exhausting their budget.
    pub rate_limited: AtomicU64,
    /// Transfers rejected by an open circuit breaker.
    pub breaker_rejections: AtomicU64,
    /// Sessions that passed validation.
    pub sessions_validated: AtomicU64,
    /// Sessions that failed validation.
    pub sessions_rejected: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        #[doc = concat!("Increment the `", stringify!($field), "` counter.")]
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl OrchestratorMetrics {
    counter!(increment_jobs_submitted, jobs_submitted);
    counter!(increment_jobs_completed, jobs_completed);
    counter!(increment_jobs_partially_failed, jobs_partially_failed);
    counter!(increment_jobs_failed, jobs_failed);
    counter!(increment_jobs_cancelled, jobs_cancelled);
    counter!(increment_items_fetched, items_fetched);
    counter!(increment_items_delivered, items_delivered);
    counter!(increment_fetch_failures, fetch_failures);
    counter!(increment_delivery_failures, delivery_failures);
    counter!(increment_rate_limited, rate_limited);
    counter!(increment_breaker_rejections, breaker_rejections);
    counter!(increment_sessions_validated, sessions_validated);
    counter!(increment_sessions_rejected, sessions_rejected);

    /// Take a consistent point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_partially_failed: self.jobs_partially_failed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            items_fetched: self.items_fetched.load(Ordering::Relaxed),
            items_delivered: self.items_delivered.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            sessions_validated: self.sessions_validated.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`OrchestratorMetrics`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Jobs accepted for processing.
    pub jobs_submitted: u64,
    /// Jobs that completed fully.
    pub jobs_completed: u64,
    /// Jobs that partially failed.
    pub jobs_partially_failed: u64,
    /// Jobs that failed.
    pub jobs_failed: u64,
    /// Jobs cancelled.
    pub jobs_cancelled: u64,
    /// Items fetched successfully.
    pub items_fetched: u64,
    /// Items delivered successfully.
    pub items_delivered: u64,
    /// Terminal item fetch failures.
    pub fetch_failures: u64,
    /// Terminal item delivery failures.
    pub delivery_failures: u64,
    /// Rate-limiter rejections.
    pub rate_limited: u64,
    /// Circuit-breaker rejections.
    pub breaker_rejections: u64,
    /// Sessions validated.
    pub sessions_validated: u64,
    /// Sessions rejected.
    pub sessions_rejected: u64,
}

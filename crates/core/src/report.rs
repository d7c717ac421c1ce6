use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{DeliveryState, FetchState, MediaItem, MediaKind};
use crate::job::{Job, JobStatus};
use crate::types::JobId;

/// Per-item slice of a job report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    /// Sequence index.
    pub index: u32,
    /// Media classification.
    pub kind: MediaKind,
    /// Original filename, when known.
    pub filename: Option<String>,
    /// Retrieval state.
    pub fetch: FetchState,
    /// Delivery state.
    pub delivery: DeliveryState,
    /// Content size in bytes, once fetched.
    pub size_bytes: Option<u64>,
    /// Human-readable failure cause, if the item failed.
    pub error: Option<String>,
}

impl From<&MediaItem> for ItemReport {
    fn from(item: &MediaItem) -> Self {
        Self {
            index: item.index,
            kind: item.kind,
            filename: item.filename.clone(),
            fetch: item.fetch.clone(),
            delivery: item.delivery.clone(),
            size_bytes: item.size_bytes,
            error: item.failure_cause().map(str::to_owned),
        }
    }
}

/// Consistent snapshot of a job for the status query surface.
///
/// Safe to take at any time, including mid-flight. The counts partition
/// cleanly: `downloaded + failed == total_files` once the job is terminal
/// (excluding cancellation, which freezes counts where they stood).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Job identifier.
    pub job_id: JobId,
    /// The submitted content reference.
    pub reference: String,
    /// Aggregate status at snapshot time.
    pub status: JobStatus,
    /// Total number of media items.
    pub total_files: usize,
    /// Items whose retrieval succeeded.
    pub downloaded: usize,
    /// Items whose delivery succeeded.
    pub uploaded: usize,
    /// Items whose retrieval failed.
    pub failed: usize,
    /// Items whose retrieval has not reached a terminal state.
    pub pending: usize,
    /// Total bytes fetched so far.
    pub bytes_fetched: u64,
    /// Wall-clock duration in seconds (to completion, or to snapshot time).
    pub duration_secs: f64,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Job-level error for fatal conditions.
    pub error: Option<String>,
    /// Per-item detail in sequence order.
    pub items: Vec<ItemReport>,
}

impl JobReport {
    /// Build a report from a job and its items (in sequence order).
    #[must_use]
    pub fn build(job: &Job, items: &[MediaItem]) -> Self {
        let downloaded = items
            .iter()
            .filter(|i| matches!(i.fetch, FetchState::Fetched))
            .count();
        let uploaded = items
            .iter()
            .filter(|i| matches!(i.delivery, DeliveryState::Sent { .. }))
            .count();
        let failed = items
            .iter()
            .filter(|i| matches!(i.fetch, FetchState::Failed { .. }))
            .count();
        let pending = items.iter().filter(|i| !i.fetch.is_terminal()).count();
        let bytes_fetched = items.iter().filter_map(|i| i.size_bytes).sum();

        Self {
            job_id: job.id.clone(),
            reference: job.reference.clone(),
            status: job.status,
            total_files: items.len(),
            downloaded,
            uploaded,
            failed,
            pending,
            bytes_fetched,
            duration_secs: job.duration().as_seconds_f64(),
            created_at: job.created_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
            items: items.iter().map(ItemReport::from).collect(),
        }
    }

    /// Human-readable per-item failure lines, one per failed item.
    ///
    /// Failed items are never dropped: every item with a cause appears,
    /// labelled by its sequence position.
    #[must_use]
    pub fn failure_lines(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| {
                item.error
                    .as_ref()
                    .map(|cause| format!("file {}/{}: {cause}", item.index + 1, self.total_files))
            })
            .collect()
    }
}

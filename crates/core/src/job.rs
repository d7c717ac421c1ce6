use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::item::{DeliveryState, FetchState, MediaItem};
use crate::types::{ItemId, JobId, OwnerScope};

/// Aggregate status of a job.
///
/// Everything except `Pending` and `Cancelled` is derived from item states
/// by [`fold_status`]; `Cancelled` is sticky and wins over any later item
/// completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no item work started.
    Pending,
    /// At least one item is being (or waiting to be) fetched.
    Downloading,
    /// At least one fetched item has entered delivery.
    Uploading,
    /// Every item was delivered.
    Completed,
    /// Some items delivered, some failed.
    PartiallyFailed,
    /// No item was delivered.
    Failed,
    /// Cancelled by the submitter.
    Cancelled,
}

impl JobStatus {
    /// Whether this status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyFailed | Self::Failed | Self::Cancelled
        )
    }

    /// Short lowercase label, stable across serialization.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user submission: one content reference to expand, fetch, and deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Owner scope the job (and any session lookup) belongs to.
    pub scope: OwnerScope,
    /// The submitted content reference (link).
    pub reference: String,
    /// Destination handle for delivery (e.g. a chat id).
    pub destination: String,
    /// Whether the content requires an authenticated session to fetch.
    pub requires_auth: bool,
}

impl JobRequest {
    /// Create a request for public content (no session required).
    #[must_use]
    pub fn new(
        scope: impl Into<OwnerScope>,
        reference: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            reference: reference.into(),
            destination: destination.into(),
            requires_auth: false,
        }
    }

    /// Mark the referenced content as requiring authentication.
    #[must_use]
    pub fn with_auth_required(mut self) -> Self {
        self.requires_auth = true;
        self
    }
}

/// One tracked submission and its aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,

    /// Owner scope.
    pub scope: OwnerScope,

    /// The submitted content reference.
    pub reference: String,

    /// Destination handle for delivery.
    pub destination: String,

    /// Whether retrieval requires an authenticated session.
    pub requires_auth: bool,

    /// Item IDs in sequence order.
    pub items: Vec<ItemId>,

    /// Aggregate status.
    pub status: JobStatus,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Job-level error, for fatal conditions that bypass item processing.
    pub error: Option<String>,
}

impl Job {
    /// Create a pending job from a request. Generates a UUID-v4 id and sets
    /// `created_at` to now.
    #[must_use]
    pub fn new(request: &JobRequest) -> Self {
        Self {
            id: JobId::new(Uuid::new_v4().to_string()),
            scope: request.scope.clone(),
            reference: request.reference.clone(),
            destination: request.destination.clone(),
            requires_auth: request.requires_auth,
            items: Vec::new(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Elapsed wall-clock time: creation to completion, or to now while the
    /// job is still in flight.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.created_at
    }
}

/// Fold item states into an aggregate job status.
///
/// This is a pure function: re-running it on an unchanged item set yields
/// the same status. While items are non-terminal the result is a live
/// projection of the furthest-progressed stage (`Uploading` beats
/// `Downloading`); once every item holds a terminal pair the result is the
/// final verdict. An empty slice folds to `Pending` — expansion has not
/// produced items yet.
///
/// `Cancelled` is never produced here: cancellation is sticky and applied
/// directly by the orchestrator.
#[must_use]
pub fn fold_status(items: &[MediaItem]) -> JobStatus {
    if items.is_empty() {
        return JobStatus::Pending;
    }

    if items.iter().all(MediaItem::is_terminal) {
        let sent = items
            .iter()
            .filter(|i| matches!(i.delivery, DeliveryState::Sent { .. }))
            .count();
        return if sent == items.len() {
            JobStatus::Completed
        } else if sent == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyFailed
        };
    }

    // Live projection: delivery activity wins over retrieval activity.
    let any_delivery_started = items.iter().any(|i| {
        matches!(
            i.delivery,
            DeliveryState::Sending | DeliveryState::Sent { .. }
        )
    });
    if any_delivery_started {
        return JobStatus::Uploading;
    }

    let any_fetch_started = items.iter().any(|i| !matches!(i.fetch, FetchState::Queued));
    if any_fetch_started {
        JobStatus::Downloading
    } else {
        JobStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeliveryId;

    fn request() -> JobRequest {
        JobRequest::new("chat-1", "https://example.com/p/abc", "chat-1")
    }

    fn items(n: u32) -> Vec<MediaItem> {
        let job = JobId::new("job-t");
        (0..n).map(|i| MediaItem::new(job.clone(), i, "r")).collect()
    }

    fn sent() -> DeliveryState {
        DeliveryState::Sent {
            delivery_id: DeliveryId::new("m"),
        }
    }

    #[test]
    fn new_job_is_pending() {
        let job = Job::new(&request());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.items.is_empty());
        assert!(job.completed_at.is_none());
        assert!(!job.requires_auth);
    }

    #[test]
    fn request_with_auth() {
        let req = request().with_auth_required();
        assert!(req.requires_auth);
        assert!(Job::new(&req).requires_auth);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::PartiallyFailed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(!JobStatus::Uploading.is_terminal());
    }

    #[test]
    fn fold_empty_is_pending() {
        assert_eq!(fold_status(&[]), JobStatus::Pending);
    }

    #[test]
    fn fold_all_queued_is_pending() {
        assert_eq!(fold_status(&items(3)), JobStatus::Pending);
    }

    #[test]
    fn fold_fetching_is_downloading() {
        let mut set = items(3);
        set[1].fetch = FetchState::Fetching;
        assert_eq!(fold_status(&set), JobStatus::Downloading);
    }

    #[test]
    fn fold_sending_is_uploading() {
        let mut set = items(3);
        set[0].fetch = FetchState::Fetched;
        set[0].delivery = DeliveryState::Sending;
        set[1].fetch = FetchState::Fetching;
        // Delivery activity wins even while other items still download.
        assert_eq!(fold_status(&set), JobStatus::Uploading);
    }

    #[test]
    fn fold_all_sent_is_completed() {
        let mut set = items(2);
        for item in &mut set {
            item.fetch = FetchState::Fetched;
            item.delivery = sent();
        }
        assert_eq!(fold_status(&set), JobStatus::Completed);
    }

    #[test]
    fn fold_none_sent_is_failed() {
        let mut set = items(2);
        for item in &mut set {
            item.fetch = FetchState::Failed {
                cause: "gone".into(),
            };
            item.delivery = DeliveryState::Skipped;
        }
        assert_eq!(fold_status(&set), JobStatus::Failed);
    }

    #[test]
    fn fold_mixed_is_partially_failed() {
        let mut set = items(3);
        set[0].fetch = FetchState::Fetched;
        set[0].delivery = sent();
        set[1].fetch = FetchState::Failed {
            cause: "gone".into(),
        };
        set[1].delivery = DeliveryState::Skipped;
        set[2].fetch = FetchState::Fetched;
        set[2].delivery = sent();
        assert_eq!(fold_status(&set), JobStatus::PartiallyFailed);
    }

    #[test]
    fn fold_delivery_failure_counts_as_not_sent() {
        let mut set = items(1);
        set[0].fetch = FetchState::Fetched;
        set[0].delivery = DeliveryState::Failed {
            cause: "too large".into(),
        };
        assert_eq!(fold_status(&set), JobStatus::Failed);
    }

    #[test]
    fn fold_is_idempotent() {
        let mut set = items(3);
        set[0].fetch = FetchState::Fetched;
        set[0].delivery = sent();
        set[1].fetch = FetchState::Fetching;
        let first = fold_status(&set);
        for _ in 0..10 {
            assert_eq!(fold_status(&set), first);
        }
    }

    #[test]
    fn job_serde_roundtrip() {
        let mut job = Job::new(&request());
        job.items.push(ItemId::new("a"));
        job.status = JobStatus::Downloading;
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.status, JobStatus::Downloading);
        assert_eq!(back.items.len(), 1);
    }

    #[test]
    fn status_labels() {
        assert_eq!(JobStatus::PartiallyFailed.to_string(), "partially_failed");
        assert_eq!(JobStatus::Pending.to_string(), "pending");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeliveryId, ItemId, JobId};

/// Broad media classification used to pick the delivery method at the
/// destination (photo message, video message, or generic document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

impl MediaKind {
    /// Classify a filename by extension. Unknown extensions fall back to
    /// [`MediaKind::Document`].
    #[must_use]
    pub fn from_filename(name: &str) -> Self {
        let ext = name.rsplit('.').next().map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("jpg" | "jpeg" | "png" | "webp") => Self::Photo,
            Some("mp4" | "mov" | "webm") => Self::Video,
            _ => Self::Document,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Photo => f.write_str("photo"),
            Self::Video => f.write_str("video"),
            Self::Document => f.write_str("document"),
        }
    }
}

/// Retrieval progress for a single media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FetchState {
    /// Not yet picked up by the orchestrator.
    Queued,
    /// A retrieval gateway call is in flight.
    Fetching,
    /// Content retrieved and staged locally.
    Fetched,
    /// Retrieval failed terminally; `cause` is human-readable.
    Failed { cause: String },
    /// The job was cancelled before retrieval reached a terminal state.
    Cancelled,
}

impl FetchState {
    /// Whether this state is terminal (no further retrieval work).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fetched | Self::Failed { .. } | Self::Cancelled)
    }
}

/// Delivery progress for a single media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Waiting for retrieval to finish and for its turn in sequence order.
    Queued,
    /// A delivery gateway call is in flight.
    Sending,
    /// Delivered; `delivery_id` is the destination's receipt.
    Sent { delivery_id: DeliveryId },
    /// Delivery failed terminally; `cause` is human-readable.
    Failed { cause: String },
    /// Never attempted because retrieval failed or the job aborted first.
    Skipped,
    /// The job was cancelled before delivery reached a terminal state.
    Cancelled,
}

impl DeliveryState {
    /// Whether this state is terminal (no further delivery work).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Sent { .. } | Self::Failed { .. } | Self::Skipped | Self::Cancelled
        )
    }
}

/// One media file within a job, independently fetched and delivered.
///
/// Items are stored arena-style: the parent [`Job`](crate::Job) holds item
/// IDs only, and items reference the job by ID, so the hierarchy stays a
/// tree with no ownership cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    /// Unique item identifier.
    pub id: ItemId,

    /// Parent job.
    pub job: JobId,

    /// Zero-based sequence index; defines delivery order.
    pub index: u32,

    /// Remote handle produced by reference expansion.
    pub remote: String,

    /// Media classification for delivery.
    pub kind: MediaKind,

    /// Original filename, when the source exposes one.
    pub filename: Option<String>,

    /// Retrieval progress.
    pub fetch: FetchState,

    /// Delivery progress.
    pub delivery: DeliveryState,

    /// Content size in bytes; `None` until fetched.
    pub size_bytes: Option<u64>,

    /// When retrieval reached `Fetched`.
    pub fetched_at: Option<DateTime<Utc>>,

    /// When delivery reached `Sent`.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// Create a queued item for the given job and sequence index.
    ///
    /// The item ID embeds the zero-padded index so that lexicographic key
    /// order matches delivery order in prefix scans.
    #[must_use]
    pub fn new(job: JobId, index: u32, remote: impl Into<String>) -> Self {
        let remote = remote.into();
        Self {
            id: ItemId::new(format!("{job}:{index:05}")),
            job,
            index,
            kind: MediaKind::Document,
            filename: None,
            remote,
            fetch: FetchState::Queued,
            delivery: DeliveryState::Queued,
            size_bytes: None,
            fetched_at: None,
            delivered_at: None,
        }
    }

    /// Set the media kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the filename and derive the media kind from its extension.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        self.kind = MediaKind::from_filename(&filename);
        self.filename = Some(filename);
        self
    }

    /// Whether both the retrieval and delivery sides are terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.fetch.is_terminal() && self.delivery.is_terminal()
    }

    /// The human-readable failure cause for this item, if any.
    ///
    /// Fetch causes take precedence: a skipped delivery is a consequence,
    /// not a cause.
    #[must_use]
    pub fn failure_cause(&self) -> Option<&str> {
        match (&self.fetch, &self.delivery) {
            (FetchState::Failed { cause }, _) | (_, DeliveryState::Failed { cause }) => {
                Some(cause.as_str())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: u32) -> MediaItem {
        MediaItem::new(JobId::new("job-1"), index, "remote/a")
    }

    #[test]
    fn media_kind_from_filename() {
        assert_eq!(MediaKind::from_filename("a.jpg"), MediaKind::Photo);
        assert_eq!(MediaKind::from_filename("b.JPEG"), MediaKind::Photo);
        assert_eq!(MediaKind::from_filename("c.mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_filename("d.mov"), MediaKind::Video);
        assert_eq!(MediaKind::from_filename("e.pdf"), MediaKind::Document);
        assert_eq!(MediaKind::from_filename("noext"), MediaKind::Document);
    }

    #[test]
    fn item_id_embeds_padded_index() {
        assert_eq!(item(0).id.as_str(), "job-1:00000");
        assert_eq!(item(12).id.as_str(), "job-1:00012");
    }

    #[test]
    fn item_ids_sort_in_sequence_order() {
        let ids: Vec<_> = (0..12).map(|i| item(i).id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn new_item_is_queued() {
        let it = item(0);
        assert_eq!(it.fetch, FetchState::Queued);
        assert_eq!(it.delivery, DeliveryState::Queued);
        assert!(!it.is_terminal());
        assert!(it.size_bytes.is_none());
    }

    #[test]
    fn with_filename_derives_kind() {
        let it = item(0).with_filename("clip.mp4");
        assert_eq!(it.kind, MediaKind::Video);
        assert_eq!(it.filename.as_deref(), Some("clip.mp4"));
    }

    #[test]
    fn terminal_states() {
        assert!(FetchState::Fetched.is_terminal());
        assert!(
            FetchState::Failed {
                cause: "x".into()
            }
            .is_terminal()
        );
        assert!(FetchState::Cancelled.is_terminal());
        assert!(!FetchState::Fetching.is_terminal());

        assert!(
            DeliveryState::Sent {
                delivery_id: DeliveryId::new("m1")
            }
            .is_terminal()
        );
        assert!(DeliveryState::Skipped.is_terminal());
        assert!(!DeliveryState::Sending.is_terminal());
    }

    #[test]
    fn failure_cause_prefers_fetch() {
        let mut it = item(0);
        it.fetch = FetchState::Failed {
            cause: "login required".into(),
        };
        it.delivery = DeliveryState::Skipped;
        assert_eq!(it.failure_cause(), Some("login required"));

        let mut it = item(1);
        it.fetch = FetchState::Fetched;
        it.delivery = DeliveryState::Failed {
            cause: "file too large".into(),
        };
        assert_eq!(it.failure_cause(), Some("file too large"));

        assert_eq!(item(2).failure_cause(), None);
    }

    #[test]
    fn item_serde_roundtrip() {
        let it = item(3).with_filename("pic.png");
        let json = serde_json::to_string(&it).unwrap();
        let back: MediaItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, it.id);
        assert_eq!(back.index, 3);
        assert_eq!(back.kind, MediaKind::Photo);
        assert_eq!(back.fetch, FetchState::Queued);
    }
}

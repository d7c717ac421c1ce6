use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::{DeliveryId, MediaKind};

/// One media file discovered by reference expansion, addressed by a
/// source-specific remote handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMedia {
    /// Opaque handle the fetcher uses to retrieve this file.
    pub handle: String,
    /// Media classification, when the source exposes it up front.
    pub kind: MediaKind,
    /// Filename suggested by the source, if any.
    pub filename: Option<String>,
}

impl RemoteMedia {
    /// Create a remote media entry classified from its filename.
    #[must_use]
    pub fn new(handle: impl Into<String>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            handle: handle.into(),
            kind: MediaKind::from_filename(&filename),
            filename: Some(filename),
        }
    }

    /// Create a remote media entry with an explicit kind and no filename.
    #[must_use]
    pub fn with_kind(handle: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            handle: handle.into(),
            kind,
            filename: None,
        }
    }
}

/// Receipt returned by the destination after a successful delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Identifier assigned by the destination (e.g. a message id).
    pub delivery_id: DeliveryId,
    /// When the destination acknowledged the delivery.
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    /// Create a receipt acknowledged now.
    #[must_use]
    pub fn new(delivery_id: impl Into<DeliveryId>) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            delivered_at: Utc::now(),
        }
    }
}

/// Result of validating a credential payload against the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the credentials are currently accepted.
    pub valid: bool,
    /// Upstream-reported expiry for the credentials, when known.
    pub expires_at: Option<DateTime<Utc>>,
    /// Human-readable rejection reason when `valid` is false.
    pub reason: Option<String>,
}

impl Validation {
    /// An accepted validation, optionally carrying an expiry.
    #[must_use]
    pub fn accepted(expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            valid: true,
            expires_at,
            reason: None,
        }
    }

    /// A rejected validation with a reason.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            expires_at: None,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_media_classifies_from_filename() {
        let media = RemoteMedia::new("h1", "carousel_01.jpg");
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.filename.as_deref(), Some("carousel_01.jpg"));
    }

    #[test]
    fn remote_media_explicit_kind() {
        let media = RemoteMedia::with_kind("h2", MediaKind::Video);
        assert_eq!(media.kind, MediaKind::Video);
        assert!(media.filename.is_none());
    }

    #[test]
    fn validation_constructors() {
        let ok = Validation::accepted(None);
        assert!(ok.valid);
        assert!(ok.reason.is_none());

        let bad = Validation::rejected("missing sessionid cookie");
        assert!(!bad.valid);
        assert_eq!(bad.reason.as_deref(), Some("missing sessionid cookie"));
    }

    #[test]
    fn receipt_serde_roundtrip() {
        let receipt = DeliveryReceipt::new("msg-7");
        let json = serde_json::to_string(&receipt).unwrap();
        let back: DeliveryReceipt = serde_json::from_str(&json).unwrap();
        assert_eq!(back.delivery_id.as_str(), "msg-7");
    }
}

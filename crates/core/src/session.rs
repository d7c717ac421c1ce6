use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{OwnerScope, SessionId};

/// Where a credential payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// Exported from a live browser session.
    BrowserExport,
    /// Imported from a credential file upload.
    FileImport,
}

impl std::fmt::Display for SessionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BrowserExport => f.write_str("browser_export"),
            Self::FileImport => f.write_str("file_import"),
        }
    }
}

/// Validity state of a stored session.
///
/// Revocation is deletion, not a state: a revoked session must not remain
/// selectable or listable, so no `Revoked` variant exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Submitted but not yet validated.
    Unvalidated,
    /// Validated and usable for authenticated retrieval.
    Active,
    /// Validation failed; not retried automatically.
    Rejected,
    /// Expiry elapsed or the upstream signalled invalidity.
    Expired,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unvalidated => f.write_str("unvalidated"),
            Self::Active => f.write_str("active"),
            Self::Rejected => f.write_str("rejected"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

/// A stored set of credentials usable for authenticated retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,

    /// Owner scope this session belongs to.
    pub scope: OwnerScope,

    /// Credential origin.
    pub source: SessionSource,

    /// Opaque credential blob. Never exposed through summaries.
    #[serde(with = "serde_bytes_b64")]
    pub payload: Vec<u8>,

    /// Current validity state.
    pub state: SessionState,

    /// When the credentials were submitted.
    pub created_at: DateTime<Utc>,

    /// When the session last passed validation.
    pub validated_at: Option<DateTime<Utc>>,

    /// When the session expires. Only moves forward, via re-validation.
    pub expires_at: Option<DateTime<Utc>>,

    /// When the retrieval gateway last used this session.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create an unvalidated session from a credential submission.
    #[must_use]
    pub fn new(scope: impl Into<OwnerScope>, source: SessionSource, payload: Vec<u8>) -> Self {
        Self {
            id: SessionId::new(Uuid::new_v4().to_string()),
            scope: scope.into(),
            source,
            payload,
            state: SessionState::Unvalidated,
            created_at: Utc::now(),
            validated_at: None,
            expires_at: None,
            last_used_at: None,
        }
    }

    /// Whether the session is `Active` and not past its expiry at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Active && self.expires_at.is_none_or(|at| at > now)
    }

    /// Read-only summary for listings; omits the credential payload.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            scope: self.scope.clone(),
            source: self.source,
            state: self.state,
            created_at: self.created_at,
            validated_at: self.validated_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// Everything about a session except its credential payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Unique session identifier.
    pub id: SessionId,
    /// Owner scope.
    pub scope: OwnerScope,
    /// Credential origin.
    pub source: SessionSource,
    /// Current validity state.
    pub state: SessionState,
    /// When the credentials were submitted.
    pub created_at: DateTime<Utc>,
    /// When the session last passed validation.
    pub validated_at: Option<DateTime<Utc>>,
    /// When the session expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the session was last used.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Base64 wire encoding for the opaque credential blob, so persisted
/// session records stay printable JSON.
mod serde_bytes_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

use serde::{Deserialize, Serialize};

use ferry_core::OwnerScope;

/// The kind of record being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// A job record.
    Job,
    /// A media item record, keyed `{job_id}:{index}` with a zero-padded
    /// index so prefix scans return delivery order.
    Item,
    /// A credential session record.
    Session,
    /// A pending credential-submission slot (TTL-bounded).
    Submission,
    Custom(String),
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Job => "job",
            Self::Item => "item",
            Self::Session => "session",
            Self::Submission => "submission",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address records in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub scope: OwnerScope,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(scope: impl Into<OwnerScope>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            kind,
            id: id.into(),
        }
    }

    /// Return a canonical string representation: `scope:kind:id`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.scope, self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

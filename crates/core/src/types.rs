use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(JobId, "A unique job identifier.");
newtype_string!(ItemId, "A unique identifier for one media item within a job.");
newtype_string!(SessionId, "A unique credential-session identifier.");
newtype_string!(
    OwnerScope,
    "The owner scope a job or session belongs to (e.g. a chat or user id)."
);
newtype_string!(
    DeliveryId,
    "The remote identifier assigned by the destination for a delivered item."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_from_str() {
        let scope = OwnerScope::from("chat-42");
        assert_eq!(scope.as_str(), "chat-42");
        assert_eq!(&*scope, "chat-42");
    }

    #[test]
    fn newtype_from_string() {
        let id = JobId::from("job-1".to_string());
        assert_eq!(id.to_string(), "job-1");
    }

    #[test]
    fn newtype_serde_roundtrip() {
        let id = SessionId::new("sess-123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess-123\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn newtype_display() {
        let d = DeliveryId::new("msg-99");
        assert_eq!(format!("{d}"), "msg-99");
    }

    #[test]
    fn newtype_ordering() {
        let a = ItemId::new("job-1:00001");
        let b = ItemId::new("job-1:00002");
        assert!(a < b);
    }
}

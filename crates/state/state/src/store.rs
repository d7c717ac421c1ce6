use std::time::Duration;

use async_trait::async_trait;

use ferry_core::OwnerScope;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};

/// Trait for persisting job, item, and session records.
///
/// Records are opaque strings (ferry stores JSON). Implementations must be
/// `Send + Sync`, safe for concurrent access, and provide at least
/// read-committed visibility per key: a `get` observes either the previous
/// or the new value of a concurrent `set`, never a torn one.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the value for a key. Returns `None` if not found or expired.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Set a value with an optional TTL, overwriting any previous value.
    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    /// Check if a key exists; if not, set it atomically with an optional TTL.
    /// Returns `true` if the key was newly set, `false` if it already existed.
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &StateKey) -> Result<bool, StateError>;

    /// Scan live records of a kind within a scope, optionally filtered to
    /// ids starting with `prefix`.
    ///
    /// Returns `(id, value)` pairs ordered by id. Item ids embed a
    /// zero-padded sequence index, so this order is delivery order.
    ///
    /// This operation may be expensive on some backends. Use sparingly.
    async fn scan(
        &self,
        scope: &OwnerScope,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError>;
}

//! Shared conformance tests for [`StateStore`] backends.

use std::time::Duration;

use ferry_core::OwnerScope;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};
use crate::store::StateStore;

fn test_key(kind: KeyKind, id: &str) -> StateKey {
    StateKey::new("test-scope", kind, id)
}

fn test_scope() -> OwnerScope {
    OwnerScope::new("test-scope")
}

/// Run the full state store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn StateStore) -> Result<(), StateError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_overwrite(store).await?;
    test_check_and_set_new(store).await?;
    test_check_and_set_existing(store).await?;
    test_delete(store).await?;
    test_scan_ordered(store).await?;
    test_scan_prefix(store).await?;
    test_scan_scope_isolation(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Job, "missing");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_set_and_get(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Job, "set-get");
    store.set(&key, "hello", None).await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("hello"));
    Ok(())
}

async fn test_overwrite(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Job, "overwrite");
    store.set(&key, "v1", None).await?;
    store.set(&key, "v2", None).await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v2"), "set should overwrite");
    Ok(())
}

async fn test_check_and_set_new(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Submission, "cas-new");
    let created = store.check_and_set(&key, "v1", None).await?;
    assert!(created, "check_and_set on new key should return true");
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"));
    Ok(())
}

async fn test_check_and_set_existing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Submission, "cas-existing");
    store.set(&key, "v1", None).await?;
    let created = store.check_and_set(&key, "v2", None).await?;
    assert!(
        !created,
        "check_and_set on existing key should return false"
    );
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"), "original value should remain");
    Ok(())
}

async fn test_delete(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Session, "to-delete");
    store.set(&key, "bye", None).await?;
    let existed = store.delete(&key).await?;
    assert!(existed, "delete should return true for existing key");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get after delete should return None");

    let existed = store.delete(&key).await?;
    assert!(!existed, "delete on missing key should return false");
    Ok(())
}

async fn test_scan_ordered(store: &dyn StateStore) -> Result<(), StateError> {
    // Insert out of order; the scan must return id order.
    for id in ["scan-a:00002", "scan-a:00000", "scan-a:00001"] {
        store
            .set(&test_key(KeyKind::Item, id), id, None)
            .await?;
    }
    let entries = store
        .scan(&test_scope(), KeyKind::Item, Some("scan-a:"))
        .await?;
    let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["scan-a:00000", "scan-a:00001", "scan-a:00002"]);
    Ok(())
}

async fn test_scan_prefix(store: &dyn StateStore) -> Result<(), StateError> {
    store
        .set(&test_key(KeyKind::Item, "scan-b:00000"), "x", None)
        .await?;
    store
        .set(&test_key(KeyKind::Item, "scan-c:00000"), "y", None)
        .await?;
    let entries = store
        .scan(&test_scope(), KeyKind::Item, Some("scan-b:"))
        .await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "scan-b:00000");
    Ok(())
}

async fn test_scan_scope_isolation(store: &dyn StateStore) -> Result<(), StateError> {
    let other = StateKey::new("other-scope", KeyKind::Session, "scan-iso");
    store.set(&other, "z", None).await?;
    let entries = store
        .scan(&test_scope(), KeyKind::Session, Some("scan-iso"))
        .await?;
    assert!(
        entries.is_empty(),
        "scan must not cross scope boundaries"
    );
    Ok(())
}

/// TTL conformance tests, separated because they need a time source the
/// caller controls (run under `tokio::test(start_paused = true)` and
/// advance between the two phases).
///
/// # Errors
///
/// Returns an error if the store misbehaves before the TTL elapses.
pub async fn set_short_ttl_fixtures(store: &dyn StateStore) -> Result<(), StateError> {
    store
        .set(
            &test_key(KeyKind::Submission, "ttl-1"),
            "short-lived",
            Some(Duration::from_secs(5)),
        )
        .await?;
    let val = store.get(&test_key(KeyKind::Submission, "ttl-1")).await?;
    assert_eq!(val.as_deref(), Some("short-lived"));
    Ok(())
}

/// Assert the TTL fixtures written by [`set_short_ttl_fixtures`] have
/// expired (call after advancing time past 5 seconds).
///
/// # Errors
///
/// Returns an error if the store still serves the expired record.
pub async fn assert_ttl_fixtures_expired(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Submission, "ttl-1");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "value should be expired");
    let entries = store
        .scan(&test_scope(), KeyKind::Submission, Some("ttl-1"))
        .await?;
    assert!(entries.is_empty(), "expired entries must not be scanned");
    Ok(())
}

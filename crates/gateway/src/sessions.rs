use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ferry_core::{OwnerScope, Session, SessionId, SessionSource, SessionState, SessionSummary};
use ferry_provider::DynCredentialValidator;
use ferry_state::{KeyKind, StateError, StateKey, StateStore};

use crate::error::GatewayError;
use crate::metrics::OrchestratorMetrics;

/// All session records live under one reserved store scope so that
/// id-only operations (`validate`, `expire`, `revoke`) need no scope
/// lookup; per-owner filtering happens on the record's own `scope` field.
const SESSION_SCOPE: &str = "_sessions";

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a pending credential submission slot stays open before an
    /// unfulfilled submission is silently abandoned.
    pub submission_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            submission_window: Duration::from_secs(300),
        }
    }
}

/// A pending credential-submission slot.
///
/// Opened when an owner announces they will upload credentials; fulfilled
/// within the window or silently expired — absence of an upload is not an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionSlot {
    /// Slot identifier to fulfil against.
    pub id: String,
    /// Owner scope the eventual session will belong to.
    pub scope: OwnerScope,
    /// When the slot was opened.
    pub opened_at: DateTime<Utc>,
    /// When the slot lapses.
    pub expires_at: DateTime<Utc>,
}

/// Result of validating a stored session, reported synchronously to the
/// submitter.
#[derive(Debug, Clone)]
pub struct ValidateOutcome {
    /// The session's state after validation (`Active` or `Rejected`).
    pub state: SessionState,
    /// Rejection reason, when the upstream refused the credentials.
    pub reason: Option<String>,
    /// Upstream-reported expiry, when accepted.
    pub expires_at: Option<DateTime<Utc>>,
}

/// CRUD and lifecycle management for credential sessions.
///
/// Sessions are persisted as JSON through the [`StateStore`]. Reads are
/// lock-free; every mutation of a session runs under that session's async
/// lock, so concurrent `validate`/`expire`/`revoke` calls serialize
/// per-session while retrieval keeps reading.
pub struct SessionManager {
    state: Arc<dyn StateStore>,
    validator: Option<Arc<dyn DynCredentialValidator>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: SessionConfig,
    metrics: Option<Arc<OrchestratorMetrics>>,
}

impl SessionManager {
    /// Create a session manager over the given store.
    ///
    /// Without a validator, `validate` reports a configuration error;
    /// every other operation works.
    pub fn new(
        state: Arc<dyn StateStore>,
        validator: Option<Arc<dyn DynCredentialValidator>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            state,
            validator,
            locks: DashMap::new(),
            config,
            metrics: None,
        }
    }

    /// Attach shared metrics counters for validation outcomes.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<OrchestratorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn session_key(id: &SessionId) -> StateKey {
        StateKey::new(SESSION_SCOPE, KeyKind::Session, id.as_str())
    }

    fn slot_key(id: &str) -> StateKey {
        StateKey::new(SESSION_SCOPE, KeyKind::Submission, id)
    }

    fn lock_for(&self, id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.as_str().to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, GatewayError> {
        match self.state.get(&Self::session_key(id)).await? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, session: &Session) -> Result<(), GatewayError> {
        let raw = encode(session)?;
        self.state
            .set(&Self::session_key(&session.id), &raw, None)
            .await?;
        Ok(())
    }

    /// Store a submitted credential payload as an unvalidated session.
    #[instrument(skip_all, fields(scope = %scope, source = %source))]
    pub async fn submit(
        &self,
        scope: impl Into<OwnerScope> + std::fmt::Display,
        source: SessionSource,
        payload: Vec<u8>,
    ) -> Result<Session, GatewayError> {
        let session = Session::new(scope, source, payload);
        self.persist(&session).await?;
        info!(session = %session.id, "credential session submitted");
        Ok(session)
    }

    /// Validate a stored session against the upstream.
    ///
    /// On success the session becomes `Active`, its validation and expiry
    /// stamps refresh, and any other `Active` session of the same
    /// `(scope, source)` is demoted to `Expired` — at most one active
    /// session per pair. On rejection the session becomes `Rejected` and
    /// is not retried automatically.
    #[instrument(skip(self), fields(session = %id))]
    pub async fn validate(&self, id: &SessionId) -> Result<ValidateOutcome, GatewayError> {
        let validator = self
            .validator
            .as_ref()
            .ok_or_else(|| {
                GatewayError::Configuration("no credential validator configured".into())
            })?
            .clone();

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut session = self
            .load(id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(id.to_string()))?;

        let validation = validator.validate(&session.payload).await?;
        let now = Utc::now();

        if validation.valid {
            session.state = SessionState::Active;
            session.validated_at = Some(now);
            // Expiry only moves forward, and only here.
            session.expires_at = match (session.expires_at, validation.expires_at) {
                (Some(old), Some(new)) => Some(old.max(new)),
                (old, new) => new.or(old),
            };
            self.persist(&session).await?;
            self.demote_other_active(&session).await?;
            if let Some(metrics) = &self.metrics {
                metrics.increment_sessions_validated();
            }
            info!(session = %id, "session validated");
            Ok(ValidateOutcome {
                state: SessionState::Active,
                reason: None,
                expires_at: session.expires_at,
            })
        } else {
            session.state = SessionState::Rejected;
            self.persist(&session).await?;
            if let Some(metrics) = &self.metrics {
                metrics.increment_sessions_rejected();
            }
            warn!(session = %id, reason = ?validation.reason, "session rejected");
            Ok(ValidateOutcome {
                state: SessionState::Rejected,
                reason: validation.reason,
                expires_at: None,
            })
        }
    }

    /// Demote every other `Active` session sharing the scope and source of
    /// `keep` to `Expired`.
    async fn demote_other_active(&self, keep: &Session) -> Result<(), GatewayError> {
        for mut other in self.all_sessions().await? {
            if other.id != keep.id
                && other.scope == keep.scope
                && other.source == keep.source
                && other.state == SessionState::Active
            {
                debug!(session = %other.id, "demoting superseded session");
                other.state = SessionState::Expired;
                self.persist(&other).await?;
            }
        }
        Ok(())
    }

    /// Return the most-recently-validated usable session for a scope.
    ///
    /// A lapsed expiry is observed here: the session is demoted to
    /// `Expired` and skipped. Returns `None` when the scope has no usable
    /// session — a typed absence, so callers can fall back or fail a job
    /// cleanly.
    pub async fn select(&self, scope: &OwnerScope) -> Result<Option<Session>, GatewayError> {
        let now = Utc::now();
        let mut best: Option<Session> = None;

        for session in self.all_sessions().await? {
            if session.scope != *scope || session.state != SessionState::Active {
                continue;
            }
            if !session.is_usable_at(now) {
                // Lazy time-triggered expiry.
                self.expire(&session.id).await?;
                continue;
            }
            let newer = best
                .as_ref()
                .is_none_or(|b| session.validated_at > b.validated_at);
            if newer {
                best = Some(session);
            }
        }

        Ok(best)
    }

    /// Transition a session to `Expired`. Idempotent; a missing session is
    /// a no-op.
    pub async fn expire(&self, id: &SessionId) -> Result<(), GatewayError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if let Some(mut session) = self.load(id).await? {
            if session.state != SessionState::Expired {
                session.state = SessionState::Expired;
                self.persist(&session).await?;
                info!(session = %id, "session expired");
            }
        }
        Ok(())
    }

    /// Delete a session. Idempotent; succeeds even if already absent.
    pub async fn revoke(&self, id: &SessionId) -> Result<(), GatewayError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let existed = self.state.delete(&Self::session_key(id)).await?;
        if existed {
            info!(session = %id, "session revoked");
        }
        self.locks.remove(id.as_str());
        Ok(())
    }

    /// List session summaries for a scope, oldest first. Never exposes
    /// credential payloads.
    pub async fn list(&self, scope: &OwnerScope) -> Result<Vec<SessionSummary>, GatewayError> {
        let mut summaries: Vec<SessionSummary> = self
            .all_sessions()
            .await?
            .into_iter()
            .filter(|s| s.scope == *scope)
            .map(|s| s.summary())
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        Ok(summaries)
    }

    /// Stamp a session's last-used time. The only mutation the retrieval
    /// path performs.
    pub async fn record_use(&self, id: &SessionId) -> Result<(), GatewayError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if let Some(mut session) = self.load(id).await? {
            session.last_used_at = Some(Utc::now());
            self.persist(&session).await?;
        }
        Ok(())
    }

    /// Open a pending submission slot for a scope.
    ///
    /// The slot lapses after the configured window; fulfilling a lapsed
    /// slot is a no-op, not an error.
    pub async fn open_submission(
        &self,
        scope: impl Into<OwnerScope>,
    ) -> Result<SubmissionSlot, GatewayError> {
        let now = Utc::now();
        let window = self.config.submission_window;
        let slot = SubmissionSlot {
            id: Uuid::new_v4().to_string(),
            scope: scope.into(),
            opened_at: now,
            expires_at: now
                + chrono::Duration::from_std(window)
                    .map_err(|e| GatewayError::Configuration(e.to_string()))?,
        };
        let raw = serde_json::to_string(&slot)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        self.state
            .set(&Self::slot_key(&slot.id), &raw, Some(window))
            .await?;
        debug!(slot = %slot.id, scope = %slot.scope, "submission slot opened");
        Ok(slot)
    }

    /// Fulfil a pending submission slot with a credential payload.
    ///
    /// Returns the new unvalidated session, or `None` when the slot has
    /// lapsed or never existed.
    pub async fn fulfill_submission(
        &self,
        slot_id: &str,
        source: SessionSource,
        payload: Vec<u8>,
    ) -> Result<Option<Session>, GatewayError> {
        let key = Self::slot_key(slot_id);
        let Some(raw) = self.state.get(&key).await? else {
            debug!(slot = %slot_id, "submission slot lapsed or unknown");
            return Ok(None);
        };
        let slot: SubmissionSlot = serde_json::from_str(&raw)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        self.state.delete(&key).await?;
        let session = self.submit(slot.scope, source, payload).await?;
        Ok(Some(session))
    }

    async fn all_sessions(&self) -> Result<Vec<Session>, GatewayError> {
        let scope = OwnerScope::new(SESSION_SCOPE);
        let entries = self.state.scan(&scope, KeyKind::Session, None).await?;
        let mut sessions = Vec::with_capacity(entries.len());
        for (_, raw) in entries {
            sessions.push(decode(&raw)?);
        }
        Ok(sessions)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("has_validator", &self.validator.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn encode(session: &Session) -> Result<String, StateError> {
    serde_json::to_string(session).map_err(|e| StateError::Serialization(e.to_string()))
}

fn decode(raw: &str) -> Result<Session, StateError> {
    serde_json::from_str(raw).map_err(|e| StateError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ferry_provider::{ProviderError, Validation};
    use ferry_state_memory::MemoryStateStore;

    use super::*;

    /// Validator scripted to accept payloads containing `"good"`.
    struct ScriptedValidator {
        expiry: Option<DateTime<Utc>>,
    }

    #[async_trait]
    impl DynCredentialValidator for ScriptedValidator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn validate(&self, payload: &[u8]) -> Result<Validation, ProviderError> {
            if payload.windows(4).any(|w| w == b"good") {
                Ok(Validation::accepted(self.expiry))
            } else {
                Ok(Validation::rejected("missing session cookie"))
            }
        }
    }

    fn manager_with(expiry: Option<DateTime<Utc>>) -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryStateStore::new()),
            Some(Arc::new(ScriptedValidator { expiry })),
            SessionConfig::default(),
        )
    }

    fn manager() -> SessionManager {
        manager_with(None)
    }

    fn scope() -> OwnerScope {
        OwnerScope::new("chat-1")
    }

    #[tokio::test]
    async fn select_before_validation_is_none() {
        let mgr = manager();
        mgr.submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        assert!(mgr.select(&scope()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submit_validate_select() {
        let mgr = manager();
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();

        let outcome = mgr.validate(&session.id).await.unwrap();
        assert_eq!(outcome.state, SessionState::Active);
        assert!(outcome.reason.is_none());

        let selected = mgr.select(&scope()).await.unwrap().expect("active session");
        assert_eq!(selected.id, session.id);
        assert_eq!(selected.payload, b"good".to_vec());
    }

    #[tokio::test]
    async fn rejected_validation_reports_reason() {
        let mgr = manager();
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"bad".to_vec())
            .await
            .unwrap();

        let outcome = mgr.validate(&session.id).await.unwrap();
        assert_eq!(outcome.state, SessionState::Rejected);
        assert_eq!(outcome.reason.as_deref(), Some("missing session cookie"));

        // A rejected session is never selectable.
        assert!(mgr.select(&scope()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn validate_without_validator_is_configuration_error() {
        let mgr = SessionManager::new(
            Arc::new(MemoryStateStore::new()),
            None,
            SessionConfig::default(),
        );
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        let err = mgr.validate(&session.id).await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[tokio::test]
    async fn validate_missing_session() {
        let mgr = manager();
        let err = mgr
            .validate(&SessionId::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn expire_then_select_is_none() {
        let mgr = manager();
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        mgr.validate(&session.id).await.unwrap();
        mgr.expire(&session.id).await.unwrap();
        assert!(mgr.select(&scope()).await.unwrap().is_none());

        // Idempotent, including for unknown ids.
        mgr.expire(&session.id).await.unwrap();
        mgr.expire(&SessionId::new("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn lapsed_expiry_is_observed_at_select() {
        let mgr = manager_with(Some(Utc::now() - chrono::Duration::minutes(1)));
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        mgr.validate(&session.id).await.unwrap();

        // Upstream said the credentials are already past their expiry.
        assert!(mgr.select(&scope()).await.unwrap().is_none());

        let listed = mgr.list(&scope()).await.unwrap();
        assert_eq!(listed[0].state, SessionState::Expired);
    }

    #[tokio::test]
    async fn second_validation_demotes_previous_active() {
        let mgr = manager();
        let first = mgr
            .submit("chat-1", SessionSource::FileImport, b"good-1".to_vec())
            .await
            .unwrap();
        mgr.validate(&first.id).await.unwrap();

        let second = mgr
            .submit("chat-1", SessionSource::FileImport, b"good-2".to_vec())
            .await
            .unwrap();
        mgr.validate(&second.id).await.unwrap();

        let selected = mgr.select(&scope()).await.unwrap().unwrap();
        assert_eq!(selected.id, second.id);

        let states: Vec<(SessionId, SessionState)> = mgr
            .list(&scope())
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.id, s.state))
            .collect();
        assert!(states.contains(&(first.id, SessionState::Expired)));
        assert!(states.contains(&(second.id, SessionState::Active)));
    }

    #[tokio::test]
    async fn different_sources_can_both_be_active() {
        let mgr = manager();
        let imported = mgr
            .submit("chat-1", SessionSource::FileImport, b"good-1".to_vec())
            .await
            .unwrap();
        mgr.validate(&imported.id).await.unwrap();

        let derived = mgr
            .submit("chat-1", SessionSource::BrowserExport, b"good-2".to_vec())
            .await
            .unwrap();
        mgr.validate(&derived.id).await.unwrap();

        let active = mgr
            .list(&scope())
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.state == SessionState::Active)
            .count();
        assert_eq!(active, 2);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let mgr = manager();
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        mgr.revoke(&session.id).await.unwrap();
        mgr.revoke(&session.id).await.unwrap();
        mgr.revoke(&SessionId::new("never-existed")).await.unwrap();
        assert!(mgr.list(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_scoped_and_payload_free() {
        let mgr = manager();
        mgr.submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        mgr.submit("chat-2", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();

        let listed = mgr.list(&scope()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].scope, scope());
    }

    #[tokio::test]
    async fn record_use_stamps_last_used() {
        let mgr = manager();
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        mgr.record_use(&session.id).await.unwrap();
        let listed = mgr.list(&scope()).await.unwrap();
        assert!(listed[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn revalidation_never_moves_expiry_backwards() {
        let later = Utc::now() + chrono::Duration::hours(2);
        let mgr = manager_with(Some(later));
        let session = mgr
            .submit("chat-1", SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        mgr.validate(&session.id).await.unwrap();

        // Second validation reports the same expiry; it must not regress.
        let outcome = mgr.validate(&session.id).await.unwrap();
        assert_eq!(outcome.expires_at, Some(later));
    }

    #[tokio::test(start_paused = true)]
    async fn submission_slot_lifecycle() {
        let mgr = manager();
        let slot = mgr.open_submission("chat-1").await.unwrap();

        let session = mgr
            .fulfill_submission(&slot.id, SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap()
            .expect("slot should still be open");
        assert_eq!(session.scope, scope());
        assert_eq!(session.state, SessionState::Unvalidated);

        // A slot can only be fulfilled once.
        let again = mgr
            .fulfill_submission(&slot.id, SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_submission_slot_is_a_noop() {
        let mgr = manager();
        let slot = mgr.open_submission("chat-1").await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;

        let result = mgr
            .fulfill_submission(&slot.id, SessionSource::FileImport, b"good".to_vec())
            .await
            .unwrap();
        assert!(result.is_none(), "lapsed slot must be a silent no-op");
        assert!(mgr.list(&scope()).await.unwrap().is_empty());
    }
}

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use ferry_core::{
    DeliveryState, FetchState, Job, JobId, JobReport, JobStatus, MediaItem, OwnerScope,
    fold_status,
};
use ferry_state::{KeyKind, StateError, StateKey, StateStore};

use crate::error::GatewayError;

/// All job and item records live under one reserved store scope so that
/// id-only lookups need no scope; per-owner listings filter on the job
/// record's own `scope` field.
const JOB_SCOPE: &str = "_jobs";

/// Durable record of jobs and their per-item sub-status.
///
/// Items are stored arena-style under keys embedding the job id and a
/// zero-padded sequence index, so a prefix scan returns them in delivery
/// order. Every aggregate recomputation runs under a per-job async lock:
/// the fold is linearizable per job even though items update concurrently,
/// and reports taken under the same lock never observe a half-applied
/// fold.
pub struct JobStore {
    state: Arc<dyn StateStore>,
    folds: DashMap<String, Arc<Mutex<()>>>,
}

impl JobStore {
    /// Create a job store over the given state backend.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self {
            state,
            folds: DashMap::new(),
        }
    }

    fn job_key(id: &JobId) -> StateKey {
        StateKey::new(JOB_SCOPE, KeyKind::Job, id.as_str())
    }

    fn item_key(item: &MediaItem) -> StateKey {
        StateKey::new(JOB_SCOPE, KeyKind::Item, item.id.as_str())
    }

    fn fold_lock(&self, id: &JobId) -> Arc<Mutex<()>> {
        self.folds
            .entry(id.as_str().to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist a job record.
    pub async fn save_job(&self, job: &Job) -> Result<(), GatewayError> {
        let raw = encode(job)?;
        self.state.set(&Self::job_key(&job.id), &raw, None).await?;
        Ok(())
    }

    /// Load a job record.
    pub async fn job(&self, id: &JobId) -> Result<Option<Job>, GatewayError> {
        match self.state.get(&Self::job_key(id)).await? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist one item record.
    pub async fn save_item(&self, item: &MediaItem) -> Result<(), GatewayError> {
        let raw = encode(item)?;
        self.state.set(&Self::item_key(item), &raw, None).await?;
        Ok(())
    }

    /// Load a job's items in sequence order.
    pub async fn items(&self, id: &JobId) -> Result<Vec<MediaItem>, GatewayError> {
        let scope = OwnerScope::new(JOB_SCOPE);
        let prefix = format!("{id}:");
        let entries = self
            .state
            .scan(&scope, KeyKind::Item, Some(&prefix))
            .await?;
        let mut items = Vec::with_capacity(entries.len());
        for (_, raw) in entries {
            items.push(decode(&raw)?);
        }
        Ok(items)
    }

    /// Attach a freshly expanded item list to a job and refold.
    ///
    /// Runs under the fold lock so a cancellation landing during expansion
    /// cannot be overwritten. Returns `false` when the job reached a
    /// terminal state in the meantime — the items are not attached and
    /// processing should stop.
    pub async fn attach_items(
        &self,
        id: &JobId,
        items: &[MediaItem],
    ) -> Result<bool, GatewayError> {
        let lock = self.fold_lock(id);
        let _guard = lock.lock().await;

        let mut job = self
            .job(id)
            .await?
            .ok_or_else(|| GatewayError::JobNotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        for item in items {
            self.save_item(item).await?;
        }
        job.items = items.iter().map(|i| i.id.clone()).collect();
        job.status = fold_status(items);
        self.save_job(&job).await?;
        Ok(true)
    }

    /// Persist an item state change and refold the job aggregate.
    ///
    /// This is the only write path for aggregate status outside terminal
    /// overrides: the status is always recomputed from the full item set,
    /// never incremented, so concurrent item updates cannot race the
    /// aggregate into an inconsistent value.
    pub async fn record_item(&self, item: &MediaItem) -> Result<JobStatus, GatewayError> {
        self.save_item(item).await?;
        self.fold_and_store(&item.job).await
    }

    /// Recompute and persist the job's aggregate status from its items.
    ///
    /// Idempotent and safe to run concurrently with other items' updates.
    /// Terminal statuses are final: a job already `Cancelled` or failed at
    /// the job level keeps its status regardless of later item activity.
    pub async fn fold_and_store(&self, id: &JobId) -> Result<JobStatus, GatewayError> {
        let lock = self.fold_lock(id);
        let _guard = lock.lock().await;

        let mut job = self
            .job(id)
            .await?
            .ok_or_else(|| GatewayError::JobNotFound(id.to_string()))?;

        if job.status.is_terminal() {
            return Ok(job.status);
        }

        let items = self.items(id).await?;
        let status = fold_status(&items);

        if status != job.status {
            debug!(job = %id, from = %job.status, to = %status, "aggregate refold");
        }
        job.status = status;
        if status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        self.save_job(&job).await?;
        Ok(status)
    }

    /// Force a job into `Failed` with a job-level error (fatal conditions
    /// that bypass item processing). No-op if the job is already terminal.
    pub async fn fail_job(&self, id: &JobId, error: impl Into<String>) -> Result<(), GatewayError> {
        let lock = self.fold_lock(id);
        let _guard = lock.lock().await;

        let mut job = self
            .job(id)
            .await?
            .ok_or_else(|| GatewayError::JobNotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        job.status = JobStatus::Failed;
        job.error = Some(error.into());
        job.completed_at = Some(Utc::now());
        self.save_job(&job).await
    }

    /// Cancel a job: every non-terminal item side becomes `Cancelled` and
    /// the aggregate is pinned to the sticky `Cancelled` status.
    ///
    /// Returns `false` when the job was already terminal (nothing to
    /// cancel), `true` otherwise.
    pub async fn cancel_job(&self, id: &JobId) -> Result<bool, GatewayError> {
        let lock = self.fold_lock(id);
        let _guard = lock.lock().await;

        let mut job = self
            .job(id)
            .await?
            .ok_or_else(|| GatewayError::JobNotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        for mut item in self.items(id).await? {
            let mut dirty = false;
            if !item.fetch.is_terminal() {
                item.fetch = FetchState::Cancelled;
                dirty = true;
            }
            if !item.delivery.is_terminal() {
                item.delivery = DeliveryState::Cancelled;
                dirty = true;
            }
            if dirty {
                self.save_item(&item).await?;
            }
        }

        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        self.save_job(&job).await?;
        Ok(true)
    }

    /// Take a consistent report snapshot of a job.
    ///
    /// Runs under the job's fold lock so a concurrent refold is never
    /// observed half-applied.
    pub async fn report(&self, id: &JobId) -> Result<Option<JobReport>, GatewayError> {
        let lock = self.fold_lock(id);
        let _guard = lock.lock().await;

        let Some(job) = self.job(id).await? else {
            return Ok(None);
        };
        let items = self.items(id).await?;
        Ok(Some(JobReport::build(&job, &items)))
    }

    /// List a scope's jobs, oldest first.
    pub async fn list_jobs(&self, scope: &OwnerScope) -> Result<Vec<Job>, GatewayError> {
        let store_scope = OwnerScope::new(JOB_SCOPE);
        let entries = self.state.scan(&store_scope, KeyKind::Job, None).await?;
        let mut jobs = Vec::new();
        for (_, raw) in entries {
            let job: Job = decode(&raw)?;
            if job.scope == *scope {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Delete a job and, cascading, all of its items.
    pub async fn delete_job(&self, id: &JobId) -> Result<bool, GatewayError> {
        let lock = self.fold_lock(id);
        let _guard = lock.lock().await;

        for item in self.items(id).await? {
            self.state.delete(&Self::item_key(&item)).await?;
        }
        let existed = self.state.delete(&Self::job_key(id)).await?;
        self.folds.remove(id.as_str());
        Ok(existed)
    }
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore").finish_non_exhaustive()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StateError> {
    serde_json::to_string(value).map_err(|e| StateError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StateError> {
    serde_json::from_str(raw).map_err(|e| StateError::Serialization(e.to_string()))
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use ferry_core::{
    DeliveryState, FetchState, Job, JobId, JobReport, JobRequest, JobStatus, MediaItem,
    OwnerScope, Session,
};
use ferry_provider::RemoteMedia;

use crate::error::GatewayError;
use crate::jobs::JobStore;
use crate::metrics::{MetricsSnapshot, OrchestratorMetrics};
use crate::sessions::SessionManager;
use crate::staging::{CleanupReport, StagingArea, StagingHandle};
use crate::transfer::{DeliveryGateway, RetrievalGateway, TransferFailure};

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum item fetches in flight per job. 1 (the default) processes
    /// items strictly sequentially; higher values fetch in parallel while
    /// delivery stays in sequence order.
    pub max_in_flight: usize,
}

impl OrchestratorConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_in_flight < 1 {
            return Err("max_in_flight must be >= 1".into());
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_in_flight: 1 }
    }
}

/// What one fetch task hands to the delivery coordinator.
enum ItemOutcome {
    /// Fetched and staged; ready to deliver when its turn comes.
    Staged {
        item: MediaItem,
        handle: StagingHandle,
    },
    /// Nothing to deliver (fetch failed, was skipped, or cancelled).
    Done { index: u32 },
}

/// Shared state behind every [`Orchestrator`] handle.
pub(crate) struct OrchestratorInner {
    pub(crate) store: JobStore,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) retrieval: RetrievalGateway,
    pub(crate) delivery: DeliveryGateway,
    pub(crate) staging: Arc<StagingArea>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) metrics: Arc<OrchestratorMetrics>,
    pub(crate) cancellations: DashMap<String, CancellationToken>,
    pub(crate) tracker: TaskTracker,
}

/// Top-level job orchestration.
///
/// Accepts a submission, expands it into ordered media items, drives each
/// item through the retrieval gateway, local staging, and the delivery
/// gateway, and keeps the job's aggregate status folded from item states.
/// One orchestrator instance processes many jobs concurrently; per-item
/// failures are isolated, and the orchestrator itself never retries —
/// retry policy lives inside the gateways.
///
/// `Orchestrator` is a cheap cloneable handle over shared state; clones
/// observe the same jobs, sessions, and staging area.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    /// Accept a submission and process it in the background.
    ///
    /// Returns the job id immediately; progress is observable at any time
    /// through [`get_job`](Self::get_job).
    #[instrument(skip_all, fields(scope = %request.scope, reference = %request.reference))]
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, GatewayError> {
        let job = self.create(&request).await?;
        let id = job.id.clone();
        let this = self.clone();
        let task_id = id.clone();
        self.inner.tracker.spawn(async move {
            this.process(task_id).await;
        });
        Ok(id)
    }

    /// Accept a submission and process it to completion, returning the
    /// final report.
    #[instrument(skip_all, fields(scope = %request.scope, reference = %request.reference))]
    pub async fn run(&self, request: JobRequest) -> Result<JobReport, GatewayError> {
        let job = self.create(&request).await?;
        self.process(job.id.clone()).await;
        self.get_job(&job.id).await
    }

    async fn create(&self, request: &JobRequest) -> Result<Job, GatewayError> {
        let job = Job::new(request);
        self.inner.store.save_job(&job).await?;
        self.inner
            .cancellations
            .insert(job.id.as_str().to_owned(), CancellationToken::new());
        self.inner.metrics.increment_jobs_submitted();
        info!(job = %job.id, "job accepted");
        Ok(job)
    }

    /// Consistent snapshot of a job, safe to call mid-flight.
    pub async fn get_job(&self, id: &JobId) -> Result<JobReport, GatewayError> {
        self.inner
            .store
            .report(id)
            .await?
            .ok_or_else(|| GatewayError::JobNotFound(id.to_string()))
    }

    /// Reports for all of a scope's jobs, oldest first.
    pub async fn list_jobs(&self, scope: &OwnerScope) -> Result<Vec<JobReport>, GatewayError> {
        let mut reports = Vec::new();
        for job in self.inner.store.list_jobs(scope).await? {
            if let Some(report) = self.inner.store.report(&job.id).await? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// Cancel a job.
    ///
    /// Marks every non-terminal item as cancelled and pins the job to the
    /// sticky `Cancelled` aggregate. In-flight gateway calls are allowed
    /// to finish; no new ones start. Returns `false` when the job was
    /// already terminal.
    pub async fn cancel(&self, id: &JobId) -> Result<bool, GatewayError> {
        if let Some(token) = self.inner.cancellations.get(id.as_str()) {
            token.cancel();
        }
        let cancelled = self.inner.store.cancel_job(id).await?;
        if cancelled {
            self.inner.metrics.increment_jobs_cancelled();
            info!(job = %id, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Delete a finished job and its items from the store.
    pub async fn purge_job(&self, id: &JobId) -> Result<bool, GatewayError> {
        self.inner.store.delete_job(id).await
    }

    /// The session administration surface.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Remove staged content older than `older_than`; returns what was
    /// reclaimed.
    pub async fn cleanup_staging(
        &self,
        older_than: Duration,
    ) -> Result<CleanupReport, GatewayError> {
        Ok(self.inner.staging.cleanup(older_than).await?)
    }

    /// The staging area, for resource accounting.
    #[must_use]
    pub fn staging(&self) -> &StagingArea {
        &self.inner.staging
    }

    /// Point-in-time metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stop accepting background work and wait for in-flight jobs.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Process one job to its terminal state, absorbing per-item failures
    /// and converting infrastructure errors into a job-level failure.
    async fn process(&self, id: JobId) {
        if let Err(e) = self.drive(&id).await {
            warn!(job = %id, error = %e, "job processing aborted");
            if let Err(persist_err) = self.inner.store.fail_job(&id, e.to_string()).await {
                warn!(job = %id, error = %persist_err, "failed to record job failure");
            }
        }

        match self.inner.store.job(&id).await {
            Ok(Some(job)) => match job.status {
                JobStatus::Completed => self.inner.metrics.increment_jobs_completed(),
                JobStatus::PartiallyFailed => {
                    self.inner.metrics.increment_jobs_partially_failed();
                }
                JobStatus::Failed => self.inner.metrics.increment_jobs_failed(),
                // Counted when the cancel request was accepted.
                JobStatus::Cancelled => {}
                status => warn!(job = %id, %status, "job finished in non-terminal status"),
            },
            Ok(None) => warn!(job = %id, "job vanished during processing"),
            Err(e) => warn!(job = %id, error = %e, "could not load job for accounting"),
        }

        self.inner.cancellations.remove(id.as_str());
    }

    async fn drive(&self, id: &JobId) -> Result<(), GatewayError> {
        let job = self
            .inner
            .store
            .job(id)
            .await?
            .ok_or_else(|| GatewayError::JobNotFound(id.to_string()))?;
        let token = self
            .inner
            .cancellations
            .get(id.as_str())
            .map(|t| t.value().clone())
            .unwrap_or_default();

        // Session selection happens once per job; items share the session
        // read-only for the duration of their fetch calls.
        let session = self.inner.sessions.select(&job.scope).await?;
        if job.requires_auth && session.is_none() {
            info!(job = %id, "failing job: content requires authentication, no active session");
            let cause = GatewayError::NoActiveSession(job.scope.to_string());
            return self.inner.store.fail_job(id, cause.to_string()).await;
        }
        if let Some(s) = &session {
            self.inner.sessions.record_use(&s.id).await?;
        }

        if token.is_cancelled() {
            self.inner.store.cancel_job(id).await?;
            return Ok(());
        }

        // Expansion: one resolve call turns the reference into the ordered
        // media list.
        let media = match self
            .inner
            .retrieval
            .resolve(&job.reference, session.as_ref())
            .await
        {
            Ok(media) => media,
            Err(failure) => {
                self.note_transfer_failure(&failure);
                return self
                    .inner
                    .store
                    .fail_job(id, format!("could not expand reference: {failure}"))
                    .await;
            }
        };
        if media.is_empty() {
            return self
                .inner
                .store
                .fail_job(id, "no content found; the post may be private or deleted")
                .await;
        }

        let items = expand_items(&job, media);
        if !self.inner.store.attach_items(id, &items).await? {
            debug!(job = %id, "job reached a terminal state during expansion");
            return Ok(());
        }
        debug!(job = %id, files = items.len(), "reference expanded");

        self.drive_items(&job, items, session, &token).await
    }

    /// Fetch items with bounded parallelism; deliver strictly in sequence
    /// order, overlapping with later fetches.
    async fn drive_items(
        &self,
        job: &Job,
        items: Vec<MediaItem>,
        session: Option<Session>,
        token: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_in_flight));
        let mut fetches = FuturesUnordered::new();

        for item in items {
            let this = self.clone();
            let sem = Arc::clone(&semaphore);
            let task_token = token.clone();
            let task_session = session.clone();
            fetches.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| GatewayError::Task(e.to_string()))?;
                this.fetch_item(item, task_session.as_ref(), &task_token)
                    .await
            }));
        }

        // Fetched-but-undelivered items wait here until it is their turn;
        // `next` is the lowest sequence index not yet resolved.
        let mut staged: BTreeMap<u32, Option<(MediaItem, StagingHandle)>> = BTreeMap::new();
        let mut next: u32 = 0;
        let mut failure: Option<GatewayError> = None;

        'fetches: while let Some(joined) = fetches.next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    failure = Some(e);
                    break 'fetches;
                }
                Err(join_err) => {
                    failure = Some(GatewayError::Task(join_err.to_string()));
                    break 'fetches;
                }
            };

            match outcome {
                ItemOutcome::Staged { item, handle } => {
                    staged.insert(item.index, Some((item, handle)));
                }
                ItemOutcome::Done { index } => {
                    staged.insert(index, None);
                }
            }

            while let Some(entry) = staged.remove(&next) {
                if let Some((item, handle)) = entry {
                    if let Err(e) = self
                        .deliver_item(item, handle, &job.destination, token)
                        .await
                    {
                        failure = Some(e);
                        break 'fetches;
                    }
                }
                next += 1;
            }
        }

        if failure.is_some() {
            // Abort the rest of the job and reclaim whatever was staged.
            token.cancel();
        }
        for (_, entry) in staged {
            if let Some((_, handle)) = entry {
                self.inner.staging.release(handle).await;
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Retrieve one item and stage its content.
    ///
    /// Per-item failures are absorbed into the item's terminal state; the
    /// returned `Err` is reserved for infrastructure errors (state store,
    /// task plumbing) that abort the whole job.
    async fn fetch_item(
        &self,
        mut item: MediaItem,
        session: Option<&Session>,
        token: &CancellationToken,
    ) -> Result<ItemOutcome, GatewayError> {
        let index = item.index;

        if token.is_cancelled() {
            item.fetch = FetchState::Cancelled;
            item.delivery = DeliveryState::Cancelled;
            self.inner.store.record_item(&item).await?;
            return Ok(ItemOutcome::Done { index });
        }

        item.fetch = FetchState::Fetching;
        self.inner.store.record_item(&item).await?;

        let media = remote_media(&item);
        match self.inner.retrieval.fetch(&media, session).await {
            Ok(content) => {
                let staged = self
                    .inner
                    .staging
                    .stage(&item.job, &item.id, &content)
                    .await;
                match staged {
                    Ok(handle) => {
                        item.fetch = FetchState::Fetched;
                        item.size_bytes = Some(handle.len());
                        item.fetched_at = Some(Utc::now());
                        if let Err(e) = self.inner.store.record_item(&item).await {
                            // Do not leak the handle on the abort path.
                            self.inner.staging.release(handle).await;
                            return Err(e);
                        }
                        self.inner.metrics.increment_items_fetched();
                        Ok(ItemOutcome::Staged { item, handle })
                    }
                    Err(io) => {
                        item.fetch = FetchState::Failed {
                            cause: format!("staging error: {io}"),
                        };
                        item.delivery = DeliveryState::Skipped;
                        self.inner.store.record_item(&item).await?;
                        self.inner.metrics.increment_fetch_failures();
                        Ok(ItemOutcome::Done { index })
                    }
                }
            }
            Err(failure) => {
                self.note_transfer_failure(&failure);
                warn!(job = %item.job, index, %failure, "item fetch failed");
                item.fetch = FetchState::Failed {
                    cause: failure.cause(),
                };
                // This item's delivery is never attempted.
                item.delivery = DeliveryState::Skipped;
                self.inner.store.record_item(&item).await?;
                self.inner.metrics.increment_fetch_failures();
                Ok(ItemOutcome::Done { index })
            }
        }
    }

    /// Deliver one staged item. The staging handle is released on every
    /// exit path.
    async fn deliver_item(
        &self,
        mut item: MediaItem,
        handle: StagingHandle,
        destination: &str,
        token: &CancellationToken,
    ) -> Result<(), GatewayError> {
        if token.is_cancelled() {
            item.delivery = DeliveryState::Cancelled;
            self.inner.staging.release(handle).await;
            return self.inner.store.record_item(&item).await.map(|_| ());
        }

        item.delivery = DeliveryState::Sending;
        self.inner.store.record_item(&item).await?;

        let content = match self.inner.staging.read(&handle).await {
            Ok(content) => content,
            Err(io) => {
                item.delivery = DeliveryState::Failed {
                    cause: format!("staging error: {io}"),
                };
                self.inner.metrics.increment_delivery_failures();
                self.inner.staging.release(handle).await;
                return self.inner.store.record_item(&item).await.map(|_| ());
            }
        };

        let media = remote_media(&item);
        let caption = item.filename.clone();
        match self
            .inner
            .delivery
            .send(destination, &media, content, caption.as_deref())
            .await
        {
            Ok(receipt) => {
                item.delivery = DeliveryState::Sent {
                    delivery_id: receipt.delivery_id,
                };
                item.delivered_at = Some(Utc::now());
                self.inner.metrics.increment_items_delivered();
            }
            Err(failure) => {
                self.note_transfer_failure(&failure);
                warn!(job = %item.job, index = item.index, %failure, "item delivery failed");
                item.delivery = DeliveryState::Failed {
                    cause: failure.cause(),
                };
                self.inner.metrics.increment_delivery_failures();
            }
        }

        self.inner.staging.release(handle).await;
        self.inner.store.record_item(&item).await.map(|_| ())
    }

    fn note_transfer_failure(&self, failure: &TransferFailure) {
        match failure {
            TransferFailure::RateLimited { .. } => self.inner.metrics.increment_rate_limited(),
            TransferFailure::BreakerOpen => self.inner.metrics.increment_breaker_rejections(),
            TransferFailure::Upstream { .. } => {}
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("retrieval", &self.inner.retrieval)
            .field("delivery", &self.inner.delivery)
            .finish_non_exhaustive()
    }
}

fn remote_media(item: &MediaItem) -> RemoteMedia {
    RemoteMedia {
        handle: item.remote.clone(),
        kind: item.kind,
        filename: item.filename.clone(),
    }
}

/// Build queued items from an expansion result, in sequence order.
fn expand_items(job: &Job, media: Vec<RemoteMedia>) -> Vec<MediaItem> {
    media
        .into_iter()
        .enumerate()
        .map(|(index, remote)| {
            #[allow(clippy::cast_possible_truncation)]
            let mut item =
                MediaItem::new(job.id.clone(), index as u32, remote.handle).with_kind(remote.kind);
            item.filename = remote.filename;
            item
        })
        .collect()
}

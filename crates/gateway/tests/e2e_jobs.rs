//! End-to-end job orchestration scenarios.
//!
//! These tests drive the full pipeline — expansion, guarded fetch,
//! staging, in-order delivery, aggregate folding — against scripted
//! fetch/delivery capabilities.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ferry_core::{DeliveryState, FetchState, JobRequest, JobStatus, Session, SessionSource};
use ferry_gateway::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, TransferConfig,
};
use ferry_provider::{
    DeliveryReceipt, DynCredentialValidator, DynDeliverer, DynFetcher, ProviderError, RemoteMedia,
    Validation,
};
use ferry_state_memory::MemoryStateStore;

// -- Scripted capabilities ---------------------------------------------------

/// Fetcher scripted per handle: handles containing `bad` fail their fetch,
/// and `delay_ms` entries slow individual handles down.
struct ScriptedFetcher {
    files: Vec<&'static str>,
    delay_ms: HashMap<&'static str, u64>,
    resolve_calls: AtomicU32,
    fetch_calls: AtomicU32,
}

impl ScriptedFetcher {
    fn new(files: Vec<&'static str>) -> Self {
        Self {
            files,
            delay_ms: HashMap::new(),
            resolve_calls: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
        }
    }

    fn with_delay(mut self, handle: &'static str, ms: u64) -> Self {
        self.delay_ms.insert(handle, ms);
        self
    }

    fn total_calls(&self) -> u32 {
        self.resolve_calls.load(Ordering::SeqCst) + self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DynFetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn resolve(
        &self,
        _reference: &str,
        _session: Option<&Session>,
    ) -> Result<Vec<RemoteMedia>, ProviderError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .files
            .iter()
            .map(|f| RemoteMedia::new(*f, *f))
            .collect())
    }

    async fn fetch(
        &self,
        media: &RemoteMedia,
        _session: Option<&Session>,
    ) -> Result<Bytes, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = self.delay_ms.get(media.handle.as_str()) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if media.handle.contains("bad") {
            return Err(ProviderError::ContentNotFound(
                "post is private or deleted".into(),
            ));
        }
        Ok(Bytes::from(format!("content-of-{}", media.handle)))
    }
}

/// Deliverer recording the order handles arrive in; handles listed in
/// `fail` are rejected.
struct RecordingDeliverer {
    delivered: Mutex<Vec<String>>,
    fail: Vec<&'static str>,
}

impl RecordingDeliverer {
    fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: Vec::new(),
        }
    }

    fn failing_on(handles: Vec<&'static str>) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: handles,
        }
    }

    fn attempts(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl DynDeliverer for RecordingDeliverer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(
        &self,
        _destination: &str,
        media: &RemoteMedia,
        _content: Bytes,
        _caption: Option<&str>,
    ) -> Result<DeliveryReceipt, ProviderError> {
        self.delivered.lock().push(media.handle.clone());
        if self.fail.contains(&media.handle.as_str()) {
            return Err(ProviderError::ExecutionFailed("file too large".into()));
        }
        Ok(DeliveryReceipt::new(format!("msg-{}", media.handle)))
    }
}

/// Validator accepting any payload containing `good`.
struct MarkerValidator;

#[async_trait]
impl DynCredentialValidator for MarkerValidator {
    fn name(&self) -> &str {
        "marker"
    }

    async fn validate(&self, payload: &[u8]) -> Result<Validation, ProviderError> {
        if payload.windows(4).any(|w| w == b"good") {
            Ok(Validation::accepted(None))
        } else {
            Ok(Validation::rejected("missing session cookie"))
        }
    }
}

// -- Harness -----------------------------------------------------------------

fn fast_transfer_config() -> TransferConfig {
    TransferConfig {
        executor: ferry_executor::ExecutorConfig {
            max_attempts: 2,
            retry_strategy: ferry_executor::RetryStrategy::Constant {
                delay: Duration::from_millis(1),
            },
            call_timeout: Duration::from_secs(5),
        },
        ..TransferConfig::default()
    }
}

async fn harness(
    fetcher: Arc<ScriptedFetcher>,
    deliverer: Arc<RecordingDeliverer>,
    staging_root: &std::path::Path,
    max_in_flight: usize,
) -> Orchestrator {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    OrchestratorBuilder::new()
        .state(Arc::new(MemoryStateStore::new()))
        .fetcher(fetcher)
        .deliverer(deliverer)
        .validator(Arc::new(MarkerValidator))
        .staging_root(staging_root)
        .retrieval_config(fast_transfer_config())
        .delivery_config(fast_transfer_config())
        .orchestrator_config(OrchestratorConfig { max_in_flight })
        .build()
        .await
        .expect("harness should build")
}

fn request() -> JobRequest {
    JobRequest::new("chat-1", "https://example.com/p/abc", "chat-1")
}

// -- Scenarios ---------------------------------------------------------------

#[tokio::test]
async fn full_success_completes_and_drains_staging() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec!["a_01.jpg", "a_02.mp4"]));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, Arc::clone(&deliverer), dir.path(), 1).await;

    let report = orch.run(request()).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total_files, 2);
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.pending, 0);
    assert_eq!(report.downloaded + report.failed, report.total_files);
    assert!(report.completed_at.is_some());
    assert!(report.bytes_fetched > 0);

    assert_eq!(deliverer.attempts(), vec!["a_01.jpg", "a_02.mp4"]);
    assert!(orch.staging().is_empty(), "staging must drain");
    assert_eq!(orch.staging().total_bytes(), 0);

    let metrics = orch.metrics();
    assert_eq!(metrics.jobs_completed, 1);
    assert_eq!(metrics.items_fetched, 2);
    assert_eq!(metrics.items_delivered, 2);
}

#[tokio::test]
async fn middle_item_fetch_failure_is_partially_failed() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        "a_01.jpg",
        "bad_02.jpg",
        "a_03.jpg",
    ]));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, Arc::clone(&deliverer), dir.path(), 1).await;

    let report = orch.run(request()).await.unwrap();

    assert_eq!(report.status, JobStatus::PartiallyFailed);
    assert_eq!(report.total_files, 3);
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.downloaded + report.failed, report.total_files);

    // Delivery was attempted for items 1 and 3 only.
    assert_eq!(deliverer.attempts(), vec!["a_01.jpg", "a_03.jpg"]);

    // The failed item keeps its cause and its never-attempted delivery.
    let failed = &report.items[1];
    assert!(matches!(failed.fetch, FetchState::Failed { .. }));
    assert_eq!(failed.delivery, DeliveryState::Skipped);
    assert!(
        failed
            .error
            .as_deref()
            .is_some_and(|e| e.contains("private or deleted"))
    );

    let lines = report.failure_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("file 2/3:"));

    assert!(orch.staging().is_empty());
}

#[tokio::test]
async fn auth_required_without_session_fails_with_zero_gateway_calls() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec!["a_01.jpg"]));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(Arc::clone(&fetcher), Arc::clone(&deliverer), dir.path(), 1).await;

    let report = orch.run(request().with_auth_required()).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.total_files, 0);
    assert!(
        report
            .error
            .as_deref()
            .is_some_and(|e| e.contains("no active session"))
    );
    assert_eq!(fetcher.total_calls(), 0, "no gateway call may be made");
    assert!(deliverer.attempts().is_empty());
    assert_eq!(orch.metrics().jobs_failed, 1);
}

#[tokio::test]
async fn auth_required_with_validated_session_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec!["a_01.jpg"]));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, deliverer, dir.path(), 1).await;

    let session = orch
        .sessions()
        .submit("chat-1", SessionSource::FileImport, b"good-cookies".to_vec())
        .await
        .unwrap();
    orch.sessions().validate(&session.id).await.unwrap();

    let report = orch.run(request().with_auth_required()).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);

    // The retrieval path stamped the session's last-used time.
    let listed = orch
        .sessions()
        .list(&ferry_core::OwnerScope::new("chat-1"))
        .await
        .unwrap();
    assert!(listed[0].last_used_at.is_some());
    assert_eq!(orch.metrics().sessions_validated, 1);
}

#[tokio::test]
async fn delivery_failure_releases_staging_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec!["a_01.jpg"]));
    let deliverer = Arc::new(RecordingDeliverer::failing_on(vec!["a_01.jpg"]));
    let orch = harness(fetcher, Arc::clone(&deliverer), dir.path(), 1).await;

    let report = orch.run(request()).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.uploaded, 0);
    // "file too large" is not retryable: exactly one delivery attempt.
    assert_eq!(deliverer.attempts().len(), 1);
    assert!(matches!(
        report.items[0].delivery,
        DeliveryState::Failed { .. }
    ));

    // The staging store is empty afterward: released exactly once, no leak.
    assert!(orch.staging().is_empty());
    assert_eq!(orch.staging().total_bytes(), 0);
    assert_eq!(orch.metrics().delivery_failures, 1);
}

#[tokio::test]
async fn parallel_fetch_preserves_delivery_order() {
    let dir = tempfile::tempdir().unwrap();
    // Item 1 is slow: items 2 and 3 fetch first and must wait their turn.
    let fetcher = Arc::new(
        ScriptedFetcher::new(vec!["a_01.jpg", "a_02.jpg", "a_03.jpg"]).with_delay("a_01.jpg", 80),
    );
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, Arc::clone(&deliverer), dir.path(), 3).await;

    let report = orch.run(request()).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(
        deliverer.attempts(),
        vec!["a_01.jpg", "a_02.jpg", "a_03.jpg"],
        "delivery must follow sequence order regardless of fetch completion order"
    );
    assert!(orch.staging().is_empty());
}

#[tokio::test]
async fn empty_expansion_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(Vec::new()));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, deliverer, dir.path(), 1).await;

    let report = orch.run(request()).await.unwrap();
    assert_eq!(report.status, JobStatus::Failed);
    assert!(
        report
            .error
            .as_deref()
            .is_some_and(|e| e.contains("no content"))
    );
}

#[tokio::test]
async fn cancellation_is_sticky_and_leak_free() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        ScriptedFetcher::new(vec!["a_01.jpg", "a_02.jpg", "a_03.jpg", "a_04.jpg"])
            .with_delay("a_01.jpg", 60)
            .with_delay("a_02.jpg", 60)
            .with_delay("a_03.jpg", 60)
            .with_delay("a_04.jpg", 60),
    );
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(Arc::clone(&fetcher), deliverer, dir.path(), 1).await;

    let job_id = orch.submit(request()).await.unwrap();

    // Let the first item get in flight, then cancel.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(orch.cancel(&job_id).await.unwrap());
    orch.shutdown().await;

    let report = orch.get_job(&job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Cancelled);

    // Cancelling an already-terminal job reports false.
    assert!(!orch.cancel(&job_id).await.unwrap());

    // In-flight work wound down without leaking staged bytes.
    assert!(orch.staging().is_empty());
    assert_eq!(orch.staging().total_bytes(), 0);

    // Not every item was fetched: cancellation stopped new gateway calls.
    assert!(fetcher.fetch_calls.load(Ordering::SeqCst) < 4);
    assert_eq!(orch.metrics().jobs_cancelled, 1);
}

#[tokio::test]
async fn status_query_is_safe_mid_flight() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        ScriptedFetcher::new(vec!["a_01.jpg", "a_02.jpg"])
            .with_delay("a_01.jpg", 40)
            .with_delay("a_02.jpg", 40),
    );
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, deliverer, dir.path(), 1).await;

    let job_id = orch.submit(request()).await.unwrap();

    // Poll while the job is running; every snapshot must be consistent:
    // with no cancellation, the retrieval-side counts partition the items.
    for _ in 0..10 {
        let report = orch.get_job(&job_id).await.unwrap();
        assert_eq!(
            report.downloaded + report.failed + report.pending,
            report.total_files
        );
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    orch.shutdown().await;
    let report = orch.get_job(&job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.downloaded + report.failed, report.total_files);
}

#[tokio::test]
async fn list_jobs_reports_scope_history() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec!["a_01.jpg"]));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, deliverer, dir.path(), 1).await;

    orch.run(request()).await.unwrap();
    orch.run(JobRequest::new("chat-1", "https://example.com/p/def", "chat-1"))
        .await
        .unwrap();
    orch.run(JobRequest::new("chat-2", "https://example.com/p/xyz", "chat-2"))
        .await
        .unwrap();

    let scope = ferry_core::OwnerScope::new("chat-1");
    let reports = orch.list_jobs(&scope).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status == JobStatus::Completed));
}

#[tokio::test]
async fn purge_removes_job_and_items() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec!["a_01.jpg"]));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, deliverer, dir.path(), 1).await;

    let report = orch.run(request()).await.unwrap();
    assert!(orch.purge_job(&report.job_id).await.unwrap());
    assert!(orch.get_job(&report.job_id).await.is_err());
}

#[tokio::test]
async fn cleanup_staging_reports_reclaimed_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(vec!["a_01.jpg"]));
    let deliverer = Arc::new(RecordingDeliverer::new());
    let orch = harness(fetcher, deliverer, dir.path(), 1).await;

    orch.run(request()).await.unwrap();

    // Normal completion already drained staging.
    let report = orch.cleanup_staging(Duration::ZERO).await.unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(report.bytes_freed, 0);
}

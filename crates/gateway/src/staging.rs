use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ferry_core::{ItemId, JobId};

/// Ownership token for locally held content between fetch and delivery.
///
/// Deliberately neither `Clone` nor `Copy`: releasing consumes the handle,
/// so a double release cannot compile. The orchestrator holds the handle
/// exclusively from fetch success until delivery reaches a terminal state.
#[derive(Debug)]
pub struct StagingHandle {
    key: String,
    path: PathBuf,
    len: u64,
}

impl StagingHandle {
    /// Size of the staged content in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the staged content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Filesystem path of the staged content.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of a staging cleanup sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Number of staged files removed.
    pub removed: u64,
    /// Total bytes reclaimed.
    pub bytes_freed: u64,
}

/// Bookkeeping for one live staged file.
#[derive(Debug)]
struct StagedEntry {
    len: u64,
    staged_at: SystemTime,
}

/// Local staging for fetched-but-undelivered content.
///
/// Files live under `root/{job_id}/{item_id}`; an in-memory index tracks
/// live handles for accounting. Staged content not released through a
/// handle (crashed jobs, abandoned items) is reclaimed by
/// [`cleanup`](Self::cleanup) sweeps based on file age.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    entries: DashMap<String, StagedEntry>,
    bytes_live: AtomicU64,
}

impl StagingArea {
    /// Create a staging area rooted at the given directory, creating it if
    /// needed.
    pub async fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            entries: DashMap::new(),
            bytes_live: AtomicU64::new(0),
        })
    }

    /// Stage fetched content for an item and take ownership of it.
    pub async fn stage(
        &self,
        job: &JobId,
        item: &ItemId,
        content: &Bytes,
    ) -> std::io::Result<StagingHandle> {
        let dir = self.root.join(job.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        // Item ids contain the `{job}:{index}` separator; keep filenames flat.
        let file_name = item.as_str().replace(':', "_");
        let path = dir.join(file_name);
        tokio::fs::write(&path, content).await?;

        let len = content.len() as u64;
        let key = item.as_str().to_owned();
        self.entries.insert(
            key.clone(),
            StagedEntry {
                len,
                staged_at: SystemTime::now(),
            },
        );
        self.bytes_live.fetch_add(len, Ordering::Relaxed);
        debug!(item = %item, bytes = len, "content staged");

        Ok(StagingHandle { key, path, len })
    }

    /// Read staged content back for delivery.
    pub async fn read(&self, handle: &StagingHandle) -> std::io::Result<Bytes> {
        let data = tokio::fs::read(&handle.path).await?;
        Ok(Bytes::from(data))
    }

    /// Release a staged file, deleting it from disk.
    ///
    /// Consumes the handle; the type system makes release exactly-once.
    /// A file already missing on disk is tolerated — release must succeed
    /// on every exit path.
    pub async fn release(&self, handle: StagingHandle) {
        if self.entries.remove(&handle.key).is_some() {
            self.bytes_live.fetch_sub(handle.len, Ordering::Relaxed);
        }
        match tokio::fs::remove_file(&handle.path).await {
            Ok(()) => debug!(item = %handle.key, "staging released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(item = %handle.key, error = %e, "staging release failed"),
        }
    }

    /// Number of live staged files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no staged files are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes currently staged.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.bytes_live.load(Ordering::Relaxed)
    }

    /// Remove staged files older than `older_than`, live or orphaned.
    ///
    /// Walks the staging root so that content left behind by crashed or
    /// abandoned jobs is reclaimed too. Returns what was removed.
    pub async fn cleanup(&self, older_than: Duration) -> std::io::Result<CleanupReport> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0u64;
        let mut bytes_freed = 0u64;

        let mut jobs = tokio::fs::read_dir(&self.root).await?;
        while let Some(job_dir) = jobs.next_entry().await? {
            if !job_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(job_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let meta = file.metadata().await?;
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                if modified >= cutoff {
                    continue;
                }
                tokio::fs::remove_file(file.path()).await?;
                removed += 1;
                bytes_freed += meta.len();

                // Drop the live-handle accounting if this file was tracked.
                let key = file.file_name().to_string_lossy().replace('_', ":");
                if self.entries.remove(&key).is_some() {
                    self.bytes_live.fetch_sub(meta.len(), Ordering::Relaxed);
                }
            }
            // Prune now-empty job directories; ignore races.
            let _ = tokio::fs::remove_dir(job_dir.path()).await;
        }

        if removed > 0 {
            info!(removed, bytes_freed, "staging cleanup");
        }
        Ok(CleanupReport {
            removed,
            bytes_freed,
        })
    }
}

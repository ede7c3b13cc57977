//! Batch artifact generation over a folder
//!
//! `concurrency` workers share one cursor over the discovered file list.
//! Every file is counted exactly once in the folder's progress record,
//! whether it was generated, already cached, or failed. The record is
//! persisted after each file and marked finished when the workers drain.

use crate::models::{ArtifactKind, FileOutcome, FolderProgress};
use crate::services::artifact_builder::{ArtifactBuilder, BuildPlan, SpectrogramStyle};
use crate::services::file_scanner::{FileScanner, ScanError};
use crate::services::path_resolver::{LogicalAudioId, PathRejected};
use crate::services::progress_store::ProgressStore;
use crate::services::tool_runner::RunControl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Progress key of a batch over the entire audio root
pub const WHOLE_ROOT_KEY: &str = ".";

/// Which artifact a batch produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchTarget {
    #[default]
    Spectrogram,
    Peaks,
}

impl BatchTarget {
    pub fn kind(self) -> ArtifactKind {
        match self {
            BatchTarget::Spectrogram => ArtifactKind::Spectrogram,
            BatchTarget::Peaks => ArtifactKind::Peaks,
        }
    }

    fn plan(self) -> BuildPlan {
        match self {
            BatchTarget::Spectrogram => BuildPlan::Spectrogram(SpectrogramStyle::Overview),
            BatchTarget::Peaks => BuildPlan::Peaks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Worker count, at least 1
    pub concurrency: usize,
    pub target: BatchTarget,
}

/// Counters of a drained batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub done: usize,
    pub generated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// A running batch
#[derive(Debug)]
pub struct BatchHandle {
    pub folder: String,
    pub total: usize,
    pub join: JoinHandle<BatchReport>,
}

#[derive(Debug)]
pub enum BatchStart {
    /// No recordings found; nothing started
    Empty,
    Started(BatchHandle),
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Rejected(#[from] PathRejected),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("a batch for {0} is already running")]
    AlreadyRunning(String),

    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("batch task failed: {0}")]
    Join(String),
}

struct Shared {
    builder: Arc<ArtifactBuilder>,
    progress: Arc<ProgressStore>,
    timeout: Option<Duration>,
}

#[derive(Default)]
struct Tally {
    generated: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
}

/// Starts and tracks batch jobs
#[derive(Clone)]
pub struct BatchRunner {
    shared: Arc<Shared>,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl BatchRunner {
    pub fn new(builder: Arc<ArtifactBuilder>, progress: Arc<ProgressStore>, timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                builder,
                progress,
                timeout,
            }),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.shared.progress
    }

    /// Walk `folder` (relative to the audio root) and launch workers.
    ///
    /// Returns once the walk is done; the batch itself runs in the background.
    pub async fn start(&self, folder: &str, options: BatchOptions) -> Result<BatchStart, BatchError> {
        let (key, dir) = self.shared.builder.resolver().resolve_folder(folder)?;
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(BatchError::FolderNotFound(folder.to_string()));
        }
        self.start_in_directory(&key, dir, options).await
    }

    /// Like [`start`](Self::start) with an already resolved directory
    pub async fn start_in_directory(&self, key: &str, dir: PathBuf, options: BatchOptions) -> Result<BatchStart, BatchError> {
        let cancel = {
            let mut active = self.active.lock().await;
            if active.contains_key(key) {
                return Err(BatchError::AlreadyRunning(key.to_string()));
            }
            let cancel = CancellationToken::new();
            active.insert(key.to_string(), cancel.clone());
            cancel
        };

        let files = match FileScanner::new().scan_async(dir.clone()).await {
            Ok(files) => files,
            Err(e) => {
                self.active.lock().await.remove(key);
                return Err(e.into());
            }
        };

        let ids: Vec<LogicalAudioId> = files
            .iter()
            .filter_map(|path| {
                let id = self.shared.builder.resolver().logical_id_for(path);
                if id.is_none() {
                    tracing::warn!(path = %path.display(), "Skipping file outside the audio root");
                }
                id
            })
            .collect();

        if ids.is_empty() {
            self.active.lock().await.remove(key);
            tracing::info!(folder = %key, dir = %dir.display(), "No recordings found, batch not started");
            return Ok(BatchStart::Empty);
        }

        let total = ids.len();
        self.shared.progress.set(key, FolderProgress::started(total)).await;
        tracing::info!(
            folder = %key,
            total,
            concurrency = options.concurrency,
            target = ?options.target,
            "Batch started"
        );

        let this = self.clone();
        let folder = key.to_string();
        let join = tokio::spawn(async move {
            let report = this.drive(&folder, Arc::new(ids), options, cancel).await;
            this.active.lock().await.remove(&folder);
            report
        });

        Ok(BatchStart::Started(BatchHandle {
            folder: key.to_string(),
            total,
            join,
        }))
    }

    /// Start and wait for completion
    pub async fn run(&self, folder: &str, options: BatchOptions) -> Result<BatchReport, BatchError> {
        match self.start(folder, options).await? {
            BatchStart::Empty => Ok(BatchReport::default()),
            BatchStart::Started(handle) => handle
                .join
                .await
                .map_err(|e| BatchError::Join(e.to_string())),
        }
    }

    /// Run over the whole audio root and wait, keyed as [`WHOLE_ROOT_KEY`]
    pub async fn run_all(&self, options: BatchOptions) -> Result<BatchReport, BatchError> {
        let root = self.shared.builder.resolver().root().to_path_buf();
        match self.start_in_directory(WHOLE_ROOT_KEY, root, options).await? {
            BatchStart::Empty => Ok(BatchReport::default()),
            BatchStart::Started(handle) => handle
                .join
                .await
                .map_err(|e| BatchError::Join(e.to_string())),
        }
    }

    /// Cancel a running batch. Returns false when none is running.
    pub async fn cancel(&self, folder: &str) -> bool {
        let key = match self.shared.builder.resolver().resolve_folder(folder) {
            Ok((key, _)) => key,
            Err(_) => folder.to_string(),
        };
        match self.active.lock().await.get(&key) {
            Some(token) => {
                tracing::info!(folder = %key, "Cancelling batch");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running batch
    pub async fn cancel_all(&self) {
        for token in self.active.lock().await.values() {
            token.cancel();
        }
    }

    pub async fn is_running(&self, folder: &str) -> bool {
        self.active.lock().await.contains_key(folder)
    }

    async fn drive(
        &self,
        folder: &str,
        ids: Arc<Vec<LogicalAudioId>>,
        options: BatchOptions,
        cancel: CancellationToken,
    ) -> BatchReport {
        let cursor = Arc::new(AtomicUsize::new(0));
        let tally = Arc::new(Tally::default());
        let mut workers = JoinSet::new();

        for worker_id in 0..options.concurrency.max(1) {
            let shared = self.shared.clone();
            let ids = ids.clone();
            let cursor = cursor.clone();
            let tally = tally.clone();
            let cancel = cancel.clone();
            let folder = folder.to_string();
            workers.spawn(async move {
                worker_loop(worker_id, &shared, &folder, &ids, &cursor, &tally, options.target, &cancel).await;
            });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(folder = %folder, error = %e, "Batch worker panicked");
            }
        }

        let progress = self
            .shared
            .progress
            .update(folder, |p| {
                p.finish();
                p.clone()
            })
            .await;

        let report = BatchReport {
            total: progress.total,
            done: progress.done,
            generated: tally.generated.load(Ordering::Relaxed),
            skipped: tally.skipped.load(Ordering::Relaxed),
            errors: tally.errors.load(Ordering::Relaxed),
            cancelled: cancel.is_cancelled(),
        };
        tracing::info!(
            folder = %folder,
            total = report.total,
            done = report.done,
            generated = report.generated,
            skipped = report.skipped,
            errors = report.errors,
            cancelled = report.cancelled,
            "Batch finished"
        );
        report
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    shared: &Shared,
    folder: &str,
    ids: &[LogicalAudioId],
    cursor: &AtomicUsize,
    tally: &Tally,
    target: BatchTarget,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let index = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(id) = ids.get(index) else {
            break;
        };

        // Cancelled mid-file: leave it uncounted
        let Some(outcome) = process_file(shared, id, target, cancel).await else {
            break;
        };
        match outcome {
            FileOutcome::Generated => tally.generated.fetch_add(1, Ordering::Relaxed),
            FileOutcome::Skipped => tally.skipped.fetch_add(1, Ordering::Relaxed),
            FileOutcome::Failed => tally.errors.fetch_add(1, Ordering::Relaxed),
        };

        let counted = shared
            .progress
            .update(folder, |p| p.record(id.as_str(), outcome))
            .await;
        if !counted {
            tracing::debug!(worker_id, uri = %id, "File already counted");
        }
    }
}

/// None when cancelled before the file completed
async fn process_file(
    shared: &Shared,
    id: &LogicalAudioId,
    target: BatchTarget,
    cancel: &CancellationToken,
) -> Option<FileOutcome> {
    let builder = &shared.builder;
    if builder.cache().exists(id, target.kind()).await {
        if target == BatchTarget::Peaks && !builder.cache().exists(id, ArtifactKind::Stats).await {
            derive_stats_best_effort(builder, id).await;
        }
        return Some(FileOutcome::Skipped);
    }

    let control = RunControl::new(cancel.child_token(), shared.timeout);
    match builder.build(id, &target.plan(), &control).await {
        Ok(_) => {
            if target == BatchTarget::Peaks {
                derive_stats_best_effort(builder, id).await;
            }
            Some(FileOutcome::Generated)
        }
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            tracing::warn!(uri = %id, target = ?target, error = %e, "Batch item failed");
            Some(FileOutcome::Failed)
        }
    }
}

async fn derive_stats_best_effort(builder: &ArtifactBuilder, id: &LogicalAudioId) {
    if let Err(e) = builder.derive_stats(id).await {
        tracing::warn!(uri = %id, error = %e, "Stats derivation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_maps_to_kind_and_plan() {
        assert_eq!(BatchTarget::default(), BatchTarget::Spectrogram);
        assert_eq!(BatchTarget::Peaks.kind(), ArtifactKind::Peaks);
        assert_eq!(
            BatchTarget::Spectrogram.plan(),
            BuildPlan::Spectrogram(SpectrogramStyle::Overview)
        );
    }

    #[test]
    fn target_deserializes_lowercase() {
        let target: BatchTarget = serde_json::from_str("\"peaks\"").unwrap();
        assert_eq!(target, BatchTarget::Peaks);
    }
}

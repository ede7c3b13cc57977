//! Durable batch progress, keyed by folder
//!
//! The whole map lives in memory behind one mutex and is written to a JSON
//! file after every mutation. Status reads come from memory, so they always
//! reflect the latest recorded file even while a write is pending.

use crate::models::FolderProgress;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Folder → progress map with optional file persistence
#[derive(Debug)]
pub struct ProgressStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, FolderProgress>>,
}

impl ProgressStore {
    /// Load from `path`. A missing or unreadable file starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Progress file unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read progress file, starting empty");
                BTreeMap::new()
            }
        };
        tracing::debug!(path = %path.display(), folders = entries.len(), "Progress store loaded");
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// Store without a backing file
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Progress of `folder`; zero value when never started
    pub async fn get(&self, folder: &str) -> FolderProgress {
        self.entries
            .lock()
            .await
            .get(folder)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the record of `folder`
    pub async fn set(&self, folder: &str, progress: FolderProgress) {
        let mut entries = self.entries.lock().await;
        entries.insert(folder.to_string(), progress);
        self.persist(&entries).await;
    }

    /// Read-modify-write of one folder's record as a single critical section
    pub async fn update<F, R>(&self, folder: &str, f: F) -> R
    where
        F: FnOnce(&mut FolderProgress) -> R,
    {
        let mut entries = self.entries.lock().await;
        let result = f(entries.entry(folder.to_string()).or_default());
        self.persist(&entries).await;
        result
    }

    /// Snapshot of every folder
    pub async fn all(&self) -> BTreeMap<String, FolderProgress> {
        self.entries.lock().await.clone()
    }

    /// Forget every folder
    pub async fn clear_all(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.persist(&entries).await;
    }

    /// Mark records left running by a previous process as finished
    pub async fn close_stale(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let mut closed = 0;
        for (folder, progress) in entries.iter_mut() {
            if progress.is_running() {
                tracing::info!(folder = %folder, done = progress.done, total = progress.total, "Closing interrupted batch record");
                progress.finish();
                closed += 1;
            }
        }
        if closed > 0 {
            self.persist(&entries).await;
        }
        closed
    }

    /// Write under the lock; failures are logged, the in-memory state stays
    /// authoritative
    async fn persist(&self, entries: &BTreeMap<String, FolderProgress>) {
        let Some(path) = &self.path else {
            return;
        };
        let bytes = match serde_json::to_vec_pretty(entries) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize progress");
                return;
            }
        };
        if let Err(e) = fieldrec_common::fs::write_atomic(path, &bytes).await {
            tracing::error!(path = %path.display(), error = %e, "Failed to persist progress");
        }
    }
}

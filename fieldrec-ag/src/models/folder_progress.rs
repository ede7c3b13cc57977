//! Batch job progress, one record per folder

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result of processing one file in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Tool ran and the artifact was written
    Generated,
    /// Artifact already cached
    Skipped,
    /// Tool failed, timed out, or the file could not be mapped
    Failed,
}

/// Persisted progress of a batch job
///
/// Lifecycle: created by [`FolderProgress::started`] when the job begins,
/// updated by [`FolderProgress::record`] per file, closed by
/// [`FolderProgress::finish`] once the workers drain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderProgress {
    pub total: usize,
    pub done: usize,
    pub started: bool,
    pub finished: bool,
    pub errors: usize,
    /// Relative paths already counted in `done`
    pub processed_files: BTreeSet<String>,
}

impl FolderProgress {
    /// Fresh record for a job over `total` files
    pub fn started(total: usize) -> Self {
        Self {
            total,
            started: true,
            ..Self::default()
        }
    }

    /// Count one file. Returns false if the file was already counted.
    pub fn record(&mut self, relative_path: &str, outcome: FileOutcome) -> bool {
        if !self.processed_files.insert(relative_path.to_string()) {
            return false;
        }
        self.done += 1;
        if outcome == FileOutcome::Failed {
            self.errors += 1;
        }
        true
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Started and not yet finished
    pub fn is_running(&self) -> bool {
        self.started && !self.finished
    }

    /// Public view without the bookkeeping set
    pub fn status(&self) -> FolderStatus {
        FolderStatus {
            total: self.total,
            done: self.done,
            finished: self.finished,
            errors: self.errors,
        }
    }
}

/// Status endpoint view of a [`FolderProgress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStatus {
    pub total: usize,
    pub done: usize,
    pub finished: bool,
    pub errors: usize,
}

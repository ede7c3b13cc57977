//! Data models for artifact generation

pub mod artifact;
pub mod folder_progress;
pub mod peaks;

pub use artifact::ArtifactKind;
pub use folder_progress::{FileOutcome, FolderProgress, FolderStatus};
pub use peaks::{ActivitySummary, PeakStats, PeaksData, PEAK_STATS_VERSION};

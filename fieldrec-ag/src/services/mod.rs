//! Artifact generation services

pub mod artifact_builder;
pub mod artifact_cache;
pub mod batch_runner;
pub mod file_scanner;
pub mod on_demand;
pub mod path_resolver;
pub mod progress_store;
pub mod stats_computer;
pub mod tool_commands;
pub mod tool_runner;

pub use artifact_builder::{ArtifactBuilder, BuildError, BuildPlan, PeaksSettings, SpectrogramParams, SpectrogramStyle};
pub use artifact_cache::{ArtifactCache, BackfillReport, CacheError};
pub use batch_runner::{BatchError, BatchOptions, BatchReport, BatchRunner, BatchStart, BatchTarget};
pub use file_scanner::{list_top_level_folders, FileScanner, FolderEntry, ScanError};
pub use on_demand::{CachedArtifact, FetchOptions, GenerateError, Generation, OnDemandGenerator};
pub use path_resolver::{LogicalAudioId, PathRejected, PathResolver};
pub use progress_store::ProgressStore;
pub use stats_computer::{compute_stats, summarize};
pub use tool_commands::ToolCommands;
pub use tool_runner::{ProcessRunner, RunControl, ToolError, ToolInvocation, ToolOutput, ToolRunner};

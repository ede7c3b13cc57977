//! Single artifact build step shared by on-demand and batch generation
//!
//! External tools write to a hidden temp sibling of the cache path; the file
//! is renamed into place only after the tool exits successfully and actually
//! produced output.

use crate::models::{ArtifactKind, PeakStats};
use crate::services::artifact_cache::{ArtifactCache, CacheError};
use crate::services::path_resolver::{LogicalAudioId, PathResolver};
use crate::services::stats_computer::compute_stats;
use crate::services::tool_commands::{parse_duration, ToolCommands};
use crate::services::tool_runner::{RunControl, ToolError, ToolInvocation, ToolRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_PX_PER_SEC: u32 = 120;
pub const MIN_PX_PER_SEC: u32 = 60;
pub const MAX_PX_PER_SEC: u32 = 300;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const MIN_HEIGHT: u32 = 160;
pub const MAX_HEIGHT: u32 = 1024;
/// Width cap keeping render latency and file size bounded
pub const MAX_SPECTROGRAM_WIDTH: u32 = 20_000;
/// Assumed duration when probing fails
const FALLBACK_DURATION_SECS: f64 = 300.0;

/// Size parameters of an on-demand spectrogram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrogramParams {
    pub px_per_sec: u32,
    pub height: u32,
}

impl Default for SpectrogramParams {
    fn default() -> Self {
        Self {
            px_per_sec: DEFAULT_PX_PER_SEC,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl SpectrogramParams {
    /// Apply defaults and clamp client-supplied values
    pub fn clamped(px_per_sec: Option<u32>, height: Option<u32>) -> Self {
        Self {
            px_per_sec: px_per_sec
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_PX_PER_SEC)
                .clamp(MIN_PX_PER_SEC, MAX_PX_PER_SEC),
            height: height
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_HEIGHT)
                .clamp(MIN_HEIGHT, MAX_HEIGHT),
        }
    }

    /// Image width for a recording of `duration` seconds
    pub fn width_for(&self, duration: Option<f64>) -> u32 {
        let seconds = duration.unwrap_or(FALLBACK_DURATION_SECS);
        let width = (seconds * self.px_per_sec as f64).round();
        (width.max(1.0) as u64).min(MAX_SPECTROGRAM_WIDTH as u64) as u32
    }
}

/// How the spectrogram is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrogramStyle {
    /// Whole timeline, width derived from duration
    Picture(SpectrogramParams),
    /// Fixed-size overview used by batch jobs
    Overview,
}

/// What to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPlan {
    Spectrogram(SpectrogramStyle),
    Peaks,
    Stats,
}

impl BuildPlan {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            BuildPlan::Spectrogram(_) => ArtifactKind::Spectrogram,
            BuildPlan::Peaks => ArtifactKind::Peaks,
            BuildPlan::Stats => ArtifactKind::Stats,
        }
    }
}

/// audiowaveform resolution settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeaksSettings {
    pub pixels_per_second: u32,
    pub bits: u8,
}

impl Default for PeaksSettings {
    fn default() -> Self {
        Self {
            pixels_per_second: 50,
            bits: 8,
        }
    }
}

/// Build failures
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("source recording not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("peaks not available for {0}")]
    PeaksUnavailable(LogicalAudioId),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{program} exited successfully but wrote no output")]
    MissingOutput { program: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Common(#[from] fieldrec_common::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Tool(e) if e.is_cancelled())
    }
}

/// Runs one build of one artifact
pub struct ArtifactBuilder {
    resolver: PathResolver,
    cache: ArtifactCache,
    commands: ToolCommands,
    runner: Arc<dyn ToolRunner>,
    peaks: PeaksSettings,
}

impl ArtifactBuilder {
    pub fn new(
        resolver: PathResolver,
        cache: ArtifactCache,
        commands: ToolCommands,
        runner: Arc<dyn ToolRunner>,
        peaks: PeaksSettings,
    ) -> Self {
        Self {
            resolver,
            cache,
            commands,
            runner,
            peaks,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Whether the source recording exists on disk
    pub async fn source_exists(&self, id: &LogicalAudioId) -> bool {
        tokio::fs::metadata(self.resolver.resolve(id))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Build the artifact and return its cache path
    pub async fn build(&self, id: &LogicalAudioId, plan: &BuildPlan, control: &RunControl) -> Result<PathBuf, BuildError> {
        match plan {
            BuildPlan::Stats => {
                self.derive_stats(id).await?;
                Ok(self.cache.cache_path(id, ArtifactKind::Stats))
            }
            BuildPlan::Peaks => {
                let source = self.require_source(id).await?;
                let settings = self.peaks;
                self.run_into_cache(id, ArtifactKind::Peaks, control, |out| {
                    self.commands
                        .peaks(&source, out, settings.pixels_per_second, settings.bits)
                })
                .await
            }
            BuildPlan::Spectrogram(SpectrogramStyle::Overview) => {
                let source = self.require_source(id).await?;
                self.run_into_cache(id, ArtifactKind::Spectrogram, control, |out| {
                    self.commands.spectrogram_overview(&source, out)
                })
                .await
            }
            BuildPlan::Spectrogram(SpectrogramStyle::Picture(params)) => {
                let source = self.require_source(id).await?;
                let duration = self.probe_duration(&source, control).await;
                let width = params.width_for(duration);
                tracing::debug!(uri = %id, ?duration, width, "Spectrogram size");
                self.run_into_cache(id, ArtifactKind::Spectrogram, control, |out| {
                    self.commands
                        .spectrogram_picture(&source, out, width, params.height)
                })
                .await
            }
        }
    }

    async fn require_source(&self, id: &LogicalAudioId) -> Result<PathBuf, BuildError> {
        let source = self.resolver.resolve(id);
        if self.source_exists(id).await {
            Ok(source)
        } else {
            Err(BuildError::SourceNotFound(source))
        }
    }

    /// Compute stats from cached peaks and write them.
    ///
    /// Missing or corrupt peaks yield [`BuildError::PeaksUnavailable`].
    pub async fn derive_stats(&self, id: &LogicalAudioId) -> Result<(PeakStats, Vec<u8>), BuildError> {
        let peaks = match self.cache.read_peaks(id).await {
            Ok(peaks) => peaks,
            Err(e) if e.is_missing() => {
                if let CacheError::Corrupt { .. } = e {
                    tracing::warn!(uri = %id, error = %e, "Cached peaks unreadable, will regenerate");
                }
                return Err(BuildError::PeaksUnavailable(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let stats = compute_stats(&peaks);
        let bytes = self.cache.write_stats(id, &stats).await?;
        Ok((stats, bytes))
    }

    /// Duration via the probe tool; None when the probe fails
    async fn probe_duration(&self, source: &Path, control: &RunControl) -> Option<f64> {
        match self.runner.run(&self.commands.probe_duration(source), control).await {
            Ok(output) => parse_duration(&output.stdout),
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "Duration probe failed");
                None
            }
        }
    }

    async fn run_into_cache<F>(
        &self,
        id: &LogicalAudioId,
        kind: ArtifactKind,
        control: &RunControl,
        make_invocation: F,
    ) -> Result<PathBuf, BuildError>
    where
        F: FnOnce(&Path) -> ToolInvocation,
    {
        let output = self.cache.cache_path(id, kind);
        fieldrec_common::fs::ensure_parent_dir(&output).await?;
        let temp = fieldrec_common::fs::temp_sibling(&output);
        let invocation = make_invocation(&temp);

        if let Err(e) = self.runner.run(&invocation, control).await {
            discard(&temp).await;
            return Err(e.into());
        }

        let produced = tokio::fs::metadata(&temp)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !produced {
            discard(&temp).await;
            return Err(BuildError::MissingOutput {
                program: invocation.program,
            });
        }

        if let Err(e) = tokio::fs::rename(&temp, &output).await {
            discard(&temp).await;
            return Err(e.into());
        }

        tracing::info!(uri = %id, kind = %kind, path = %output.display(), "Artifact generated");
        Ok(output)
    }
}

async fn discard(temp: &Path) {
    let _ = tokio::fs::remove_file(temp).await;
}

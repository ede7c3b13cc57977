//! Artifact kinds derived from a source recording

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three derived files cached per recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// PNG spectrogram image rendered by ffmpeg
    Spectrogram,
    /// Waveform peaks JSON produced by audiowaveform
    Peaks,
    /// Activity statistics derived in-process from peaks
    Stats,
}

impl ArtifactKind {
    /// Suffix appended to the cache file name
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Spectrogram => ".png",
            ArtifactKind::Peaks => ".peaks.json",
            ArtifactKind::Stats => ".stats.json",
        }
    }

    /// HTTP content type of the cached bytes
    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Spectrogram => "image/png",
            ArtifactKind::Peaks | ArtifactKind::Stats => "application/json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Spectrogram => "spectrogram",
            ArtifactKind::Peaks => "peaks",
            ArtifactKind::Stats => "stats",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

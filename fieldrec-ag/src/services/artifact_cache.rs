//! Artifact cache: (logical id, kind) → file on disk
//!
//! Layout mirrors the source tree:
//! - Spectrogram: `<spectro_root>/<id>.png` (source extension kept)
//! - Peaks: `<cache_dir>/peaks/<id without .wav>.peaks.json`
//! - Stats: `<cache_dir>/peaks/<id without .wav>.stats.json`
//!
//! Peaks and stats keys drop the `.wav` extension in any case, so `x/a.wav`,
//! `x/a.WAV` and an extensionless `x/a` share one peaks file and one stats
//! file. Existing caches use this layout; a folder holding two such names
//! gets whichever was built first until `regen` is requested.
//!
//! A file existing at its canonical path is the only validity signal; there
//! is no expiry. Writes go through a temp sibling + rename, so a canonical
//! path never holds a torn file.

use crate::models::{ArtifactKind, PeakStats, PeaksData};
use crate::services::path_resolver::LogicalAudioId;
use crate::services::stats_computer::compute_stats;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Subdirectory of the cache dir holding peaks and stats
pub const PEAKS_SUBDIR: &str = "peaks";

/// PNG file signature
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Cache read/write errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// No artifact at the canonical path
    #[error("artifact not cached: {0}")]
    NotFound(PathBuf),

    /// Present but unparseable; callers regenerate instead of surfacing this
    #[error("corrupt artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] fieldrec_common::Error),
}

impl CacheError {
    /// NotFound and Corrupt both mean "generate it"
    pub fn is_missing(&self) -> bool {
        matches!(self, CacheError::NotFound(_) | CacheError::Corrupt { .. })
    }
}

/// Outcome of a stats backfill pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub peaks_files: usize,
    pub written: usize,
    pub already_valid: usize,
    pub failed: usize,
}

/// Filesystem-backed artifact cache
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    spectro_root: PathBuf,
    cache_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(spectro_root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            spectro_root: spectro_root.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn spectro_root(&self) -> &Path {
        &self.spectro_root
    }

    /// Directory peaks and stats live under
    pub fn peaks_dir(&self) -> PathBuf {
        self.cache_dir.join(PEAKS_SUBDIR)
    }

    /// Canonical cache path of an artifact
    pub fn cache_path(&self, id: &LogicalAudioId, kind: ArtifactKind) -> PathBuf {
        let (base, relative) = match kind {
            ArtifactKind::Spectrogram => (self.spectro_root.clone(), id.as_str()),
            ArtifactKind::Peaks | ArtifactKind::Stats => {
                (self.peaks_dir(), strip_wav_extension(id.as_str()))
            }
        };
        let mut path = base;
        for segment in relative.split('/') {
            path.push(segment);
        }
        append_to_file_name(path, kind.suffix())
    }

    /// Cheap existence check
    pub async fn exists(&self, id: &LogicalAudioId, kind: ArtifactKind) -> bool {
        tokio::fs::metadata(self.cache_path(id, kind))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read and validate the cached bytes
    pub async fn read(&self, id: &LogicalAudioId, kind: ArtifactKind) -> Result<Vec<u8>, CacheError> {
        let path = self.cache_path(id, kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(path))
            }
            Err(e) => return Err(e.into()),
        };
        validate(kind, &bytes).map_err(|reason| CacheError::Corrupt { path, reason })?;
        Ok(bytes)
    }

    /// Read and parse cached peaks
    pub async fn read_peaks(&self, id: &LogicalAudioId) -> Result<PeaksData, CacheError> {
        let bytes = self.read(id, ArtifactKind::Peaks).await?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
            path: self.cache_path(id, ArtifactKind::Peaks),
            reason: e.to_string(),
        })
    }

    /// Read and parse cached stats
    pub async fn read_stats(&self, id: &LogicalAudioId) -> Result<PeakStats, CacheError> {
        let bytes = self.read(id, ArtifactKind::Stats).await?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
            path: self.cache_path(id, ArtifactKind::Stats),
            reason: e.to_string(),
        })
    }

    /// Write an artifact, creating parent directories as needed.
    ///
    /// Safe for concurrent writers of different ids. Two writers of the same
    /// (id, kind) each rename a complete file into place; the last one wins.
    pub async fn write(&self, id: &LogicalAudioId, kind: ArtifactKind, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.cache_path(id, kind);
        fieldrec_common::fs::write_atomic(&path, bytes).await?;
        Ok(path)
    }

    /// Serialize and write stats, returning the written bytes
    pub async fn write_stats(&self, id: &LogicalAudioId, stats: &PeakStats) -> Result<Vec<u8>, CacheError> {
        let bytes = serde_json::to_vec(stats).map_err(fieldrec_common::Error::from)?;
        self.write(id, ArtifactKind::Stats, &bytes).await?;
        Ok(bytes)
    }

    /// Delete a cached artifact. Missing files are not an error.
    pub async fn remove(&self, id: &LogicalAudioId, kind: ArtifactKind) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.cache_path(id, kind)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Compute stats for every cached peaks file whose stats are missing or
    /// corrupt. Operates on cache paths directly, so it also covers peaks
    /// whose source recording has since moved.
    pub async fn backfill_stats(&self) -> BackfillReport {
        let peaks_dir = self.peaks_dir();
        let peaks_suffix = ArtifactKind::Peaks.suffix();
        let files = tokio::task::spawn_blocking(move || {
            WalkDir::new(&peaks_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!("Error accessing cache entry: {}", e);
                        None
                    }
                })
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| {
                            let n = n.to_string_lossy();
                            !n.starts_with('.') && n.ends_with(peaks_suffix)
                        })
                        .unwrap_or(false)
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        let mut report = BackfillReport {
            peaks_files: files.len(),
            ..BackfillReport::default()
        };

        for peaks_path in files {
            let stats_path = sibling_stats_path(&peaks_path);
            if let Ok(bytes) = tokio::fs::read(&stats_path).await {
                if validate(ArtifactKind::Stats, &bytes).is_ok() {
                    report.already_valid += 1;
                    continue;
                }
            }

            let result = async {
                let bytes = tokio::fs::read(&peaks_path).await?;
                let peaks: PeaksData = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::Corrupt { path: peaks_path.clone(), reason: e.to_string() })?;
                let stats = serde_json::to_vec(&compute_stats(&peaks))
                    .map_err(fieldrec_common::Error::from)?;
                fieldrec_common::fs::write_atomic(&stats_path, &stats).await?;
                Ok::<_, CacheError>(())
            }
            .await;

            match result {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!(peaks = %peaks_path.display(), error = %e, "Stats backfill failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Check the bytes look like the given kind
fn validate(kind: ArtifactKind, bytes: &[u8]) -> Result<(), String> {
    match kind {
        ArtifactKind::Spectrogram => {
            if bytes.starts_with(&PNG_SIGNATURE) {
                Ok(())
            } else {
                Err("missing PNG signature".to_string())
            }
        }
        ArtifactKind::Peaks => serde_json::from_slice::<PeaksData>(bytes)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        ArtifactKind::Stats => serde_json::from_slice::<PeakStats>(bytes)
            .map(|_| ())
            .map_err(|e| e.to_string()),
    }
}

/// `a/b.wav` → `a/b`, case-insensitive on the extension.
///
/// Not injective: `a/b.WAV` and `a/b` map to the same key.
fn strip_wav_extension(relative: &str) -> &str {
    let len = relative.len();
    if len > 4 && relative.is_char_boundary(len - 4) && relative[len - 4..].eq_ignore_ascii_case(".wav") {
        &relative[..len - 4]
    } else {
        relative
    }
}

fn append_to_file_name(path: PathBuf, suffix: &str) -> PathBuf {
    let mut os = path.into_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

fn sibling_stats_path(peaks_path: &Path) -> PathBuf {
    let name = peaks_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(ArtifactKind::Peaks.suffix())
        .unwrap_or(&name);
    peaks_path.with_file_name(format!("{}{}", stem, ArtifactKind::Stats.suffix()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LogicalAudioId {
        LogicalAudioId::parse(s).unwrap()
    }

    #[test]
    fn cache_paths_mirror_source_tree() {
        let cache = ArtifactCache::new("/spectro", "/cache");
        let a = id("siteA/2024/a.wav");

        assert_eq!(
            cache.cache_path(&a, ArtifactKind::Spectrogram),
            PathBuf::from("/spectro/siteA/2024/a.wav.png")
        );
        assert_eq!(
            cache.cache_path(&a, ArtifactKind::Peaks),
            PathBuf::from("/cache/peaks/siteA/2024/a.peaks.json")
        );
        assert_eq!(
            cache.cache_path(&a, ArtifactKind::Stats),
            PathBuf::from("/cache/peaks/siteA/2024/a.stats.json")
        );
        assert_eq!(
            cache.cache_path(&id("x/LOUD.WAV"), ArtifactKind::Peaks),
            PathBuf::from("/cache/peaks/x/LOUD.peaks.json")
        );
        assert_eq!(
            cache.cache_path(&id("x/clip.flac"), ArtifactKind::Peaks),
            PathBuf::from("/cache/peaks/x/clip.flac.peaks.json")
        );
    }

    #[test]
    fn peaks_keys_collapse_wav_extension_variants() {
        let cache = ArtifactCache::new("/spectro", "/cache");
        let shared = PathBuf::from("/cache/peaks/x/a.peaks.json");
        for variant in ["x/a.wav", "x/a.WAV", "x/a.Wav", "x/a"] {
            assert_eq!(cache.cache_path(&id(variant), ArtifactKind::Peaks), shared, "{variant}");
        }
        // Spectrograms keep the full name and do not collide
        assert_ne!(
            cache.cache_path(&id("x/a.wav"), ArtifactKind::Spectrogram),
            cache.cache_path(&id("x/a.WAV"), ArtifactKind::Spectrogram)
        );
    }

    #[tokio::test]
    async fn read_distinguishes_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path().join("spectro"), dir.path().join("cache"));
        let a = id("site/a.wav");

        assert!(matches!(
            cache.read(&a, ArtifactKind::Peaks).await,
            Err(CacheError::NotFound(_))
        ));

        cache.write(&a, ArtifactKind::Peaks, b"{not json").await.unwrap();
        let err = cache.read(&a, ArtifactKind::Peaks).await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
        assert!(err.is_missing());

        cache.write(&a, ArtifactKind::Spectrogram, b"GIF89a").await.unwrap();
        assert!(matches!(
            cache.read(&a, ArtifactKind::Spectrogram).await,
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn write_then_read_peaks_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path().join("spectro"), dir.path().join("cache"));
        let a = id("site/deep/a.wav");

        let json = br#"{"version":2,"channels":1,"sample_rate":8000,"samples_per_pixel":80,"bits":8,"length":3,"data":[0,5,9]}"#;
        cache.write(&a, ArtifactKind::Peaks, json).await.unwrap();

        assert!(cache.exists(&a, ArtifactKind::Peaks).await);
        let peaks = cache.read_peaks(&a).await.unwrap();
        assert_eq!(peaks.data, vec![0, 5, 9]);
        assert_eq!(peaks.sample_rate, 8000);

        cache.remove(&a, ArtifactKind::Peaks).await.unwrap();
        cache.remove(&a, ArtifactKind::Peaks).await.unwrap();
        assert!(!cache.exists(&a, ArtifactKind::Peaks).await);
    }

    #[tokio::test]
    async fn backfill_writes_missing_and_corrupt_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path().join("spectro"), dir.path().join("cache"));
        let peaks = br#"{"sample_rate":100,"samples_per_pixel":10,"data":[0,0,50,50]}"#;

        for name in ["s/a.wav", "s/b.wav", "s/c.wav"] {
            cache.write(&id(name), ArtifactKind::Peaks, peaks).await.unwrap();
        }
        let valid = compute_stats(&cache.read_peaks(&id("s/a.wav")).await.unwrap());
        cache.write_stats(&id("s/a.wav"), &valid).await.unwrap();
        cache.write(&id("s/b.wav"), ArtifactKind::Stats, b"garbage").await.unwrap();

        let report = cache.backfill_stats().await;
        assert_eq!(
            report,
            BackfillReport { peaks_files: 3, written: 2, already_valid: 1, failed: 0 }
        );
        assert!(cache.read_stats(&id("s/b.wav")).await.is_ok());
        assert!(cache.read_stats(&id("s/c.wav")).await.is_ok());
    }
}

//! Configuration resolution for fieldrec-ag
//!
//! Priority per option: CLI flag → environment variable → TOML file →
//! compiled default. clap covers the first two tiers.

use clap::Args;
use fieldrec_common::config::TomlConfig;
use fieldrec_common::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::{PeaksSettings, ToolCommands};

pub const DEFAULT_BIND: &str = "127.0.0.1:5730";
pub const DEFAULT_AUDIO_ROOT: &str = "/mnt/frogshare/Data";
pub const DEFAULT_CACHE_DIR: &str = "./.cache";
pub const DEFAULT_PROGRESS_FILE: &str = "./.spectro-cache/progress.json";
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;
pub const DEFAULT_PEAKS_CONCURRENCY: usize = 2;

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Address to listen on
    #[arg(long, env = "FIELDREC_BIND")]
    pub bind: Option<String>,

    /// Root directory of the source recordings
    #[arg(long, env = "AUDIO_ROOT")]
    pub audio_root: Option<PathBuf>,

    /// Output root for spectrogram images
    #[arg(long, env = "SPECTRO_ROOT")]
    pub spectro_root: Option<PathBuf>,

    /// Cache root for peaks and stats
    #[arg(long, env = "CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Batch progress document
    #[arg(long, env = "FIELDREC_PROGRESS_FILE")]
    pub progress_file: Option<PathBuf>,

    #[arg(long, env = "AUDIOWAVEFORM_BIN")]
    pub audiowaveform_bin: Option<String>,

    #[arg(long, env = "FFMPEG_BIN")]
    pub ffmpeg_bin: Option<String>,

    #[arg(long, env = "FFPROBE_BIN")]
    pub ffprobe_bin: Option<String>,

    /// Default worker count of spectrogram batches
    #[arg(long, env = "BATCH_CONCURRENCY")]
    pub batch_concurrency: Option<usize>,

    /// Default worker count of peaks batches
    #[arg(long, env = "PEAKS_CONCURRENCY")]
    pub peaks_concurrency: Option<usize>,

    /// audiowaveform --pixels-per-second
    #[arg(long, env = "PEAKS_PPS")]
    pub peaks_pps: Option<u32>,

    /// audiowaveform bit depth (8 or 16)
    #[arg(long, env = "PEAKS_BITS")]
    pub peaks_bits: Option<u8>,

    /// Per-invocation tool timeout; unset means no timeout
    #[arg(long, env = "TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AgConfig {
    pub bind: SocketAddr,
    pub audio_root: PathBuf,
    pub spectro_root: PathBuf,
    pub cache_dir: PathBuf,
    pub progress_file: PathBuf,
    pub tools: ToolCommands,
    pub batch_concurrency: usize,
    pub peaks_concurrency: usize,
    pub peaks: PeaksSettings,
    pub tool_timeout: Option<Duration>,
}

impl AgConfig {
    /// Merge CLI/ENV values over the TOML file and validate
    pub fn resolve(args: &ConfigArgs, toml: &TomlConfig) -> Result<Self> {
        let bind_str = args
            .bind
            .clone()
            .or_else(|| toml.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {:?}: {}", bind_str, e)))?;

        let audio_root = args
            .audio_root
            .clone()
            .or_else(|| toml.audio_root.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_ROOT));
        let cache_dir = args
            .cache_dir
            .clone()
            .or_else(|| toml.cache_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
        let spectro_root = args
            .spectro_root
            .clone()
            .or_else(|| toml.spectro_root.clone())
            .unwrap_or_else(|| cache_dir.join("spectrograms"));
        let progress_file = args
            .progress_file
            .clone()
            .or_else(|| toml.progress_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRESS_FILE));

        let defaults = ToolCommands::default();
        let tools = ToolCommands {
            audiowaveform: args
                .audiowaveform_bin
                .clone()
                .or_else(|| toml.tools.audiowaveform.clone())
                .unwrap_or(defaults.audiowaveform),
            ffmpeg: args
                .ffmpeg_bin
                .clone()
                .or_else(|| toml.tools.ffmpeg.clone())
                .unwrap_or(defaults.ffmpeg),
            ffprobe: args
                .ffprobe_bin
                .clone()
                .or_else(|| toml.tools.ffprobe.clone())
                .unwrap_or(defaults.ffprobe),
        };

        let batch_concurrency = args
            .batch_concurrency
            .or(toml.jobs.batch_concurrency)
            .unwrap_or(DEFAULT_BATCH_CONCURRENCY);
        let peaks_concurrency = args
            .peaks_concurrency
            .or(toml.jobs.peaks_concurrency)
            .unwrap_or(DEFAULT_PEAKS_CONCURRENCY);
        if batch_concurrency == 0 || peaks_concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }

        let peak_defaults = PeaksSettings::default();
        let peaks = PeaksSettings {
            pixels_per_second: args
                .peaks_pps
                .or(toml.jobs.peaks_pixels_per_second)
                .unwrap_or(peak_defaults.pixels_per_second),
            bits: args
                .peaks_bits
                .or(toml.jobs.peaks_bits)
                .unwrap_or(peak_defaults.bits),
        };
        if peaks.pixels_per_second == 0 {
            return Err(Error::Config("peaks pixels per second must be positive".to_string()));
        }
        if peaks.bits != 8 && peaks.bits != 16 {
            return Err(Error::Config(format!("peaks bits must be 8 or 16, got {}", peaks.bits)));
        }

        let tool_timeout = args
            .tool_timeout_secs
            .or(toml.tools.timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            bind,
            audio_root,
            spectro_root,
            cache_dir,
            progress_file,
            tools,
            batch_concurrency,
            peaks_concurrency,
            peaks,
            tool_timeout,
        })
    }

    /// Log the effective roots
    pub fn log_summary(&self) {
        tracing::info!(
            audio_root = %self.audio_root.display(),
            spectro_root = %self.spectro_root.display(),
            cache_dir = %self.cache_dir.display(),
            progress_file = %self.progress_file.display(),
            "Storage roots"
        );
        tracing::info!(
            batch_concurrency = self.batch_concurrency,
            peaks_concurrency = self.peaks_concurrency,
            peaks_pps = self.peaks.pixels_per_second,
            peaks_bits = self.peaks.bits,
            tool_timeout = ?self.tool_timeout,
            "Job settings"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldrec_common::config::parse_toml_config;

    #[test]
    fn defaults_apply_when_nothing_set() {
        let config = AgConfig::resolve(&ConfigArgs::default(), &TomlConfig::default()).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND.parse::<SocketAddr>().unwrap());
        assert_eq!(config.audio_root, PathBuf::from(DEFAULT_AUDIO_ROOT));
        assert_eq!(config.spectro_root, PathBuf::from(DEFAULT_CACHE_DIR).join("spectrograms"));
        assert_eq!(config.batch_concurrency, 8);
        assert_eq!(config.peaks_concurrency, 2);
        assert_eq!(config.peaks, PeaksSettings { pixels_per_second: 50, bits: 8 });
        assert_eq!(config.tool_timeout, None);
        assert_eq!(config.tools, ToolCommands::default());
    }

    #[test]
    fn cli_overrides_toml() {
        let toml = parse_toml_config(
            r#"
            audio_root = "/toml/audio"
            cache_dir = "/toml/cache"

            [jobs]
            batch_concurrency = 3
            peaks_bits = 16

            [tools]
            ffmpeg = "/opt/ffmpeg"
            timeout_secs = 90
            "#,
        )
        .unwrap();
        let args = ConfigArgs {
            audio_root: Some(PathBuf::from("/cli/audio")),
            batch_concurrency: Some(5),
            ..ConfigArgs::default()
        };

        let config = AgConfig::resolve(&args, &toml).unwrap();
        assert_eq!(config.audio_root, PathBuf::from("/cli/audio"));
        assert_eq!(config.cache_dir, PathBuf::from("/toml/cache"));
        assert_eq!(config.spectro_root, PathBuf::from("/toml/cache/spectrograms"));
        assert_eq!(config.batch_concurrency, 5);
        assert_eq!(config.peaks.bits, 16);
        assert_eq!(config.tools.ffmpeg, "/opt/ffmpeg");
        assert_eq!(config.tool_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let bad_bits = ConfigArgs { peaks_bits: Some(12), ..ConfigArgs::default() };
        assert!(matches!(
            AgConfig::resolve(&bad_bits, &TomlConfig::default()),
            Err(Error::Config(_))
        ));

        let zero_workers = ConfigArgs { batch_concurrency: Some(0), ..ConfigArgs::default() };
        assert!(AgConfig::resolve(&zero_workers, &TomlConfig::default()).is_err());

        let bad_bind = ConfigArgs { bind: Some("not-an-address".into()), ..ConfigArgs::default() };
        assert!(AgConfig::resolve(&bad_bind, &TomlConfig::default()).is_err());
    }
}

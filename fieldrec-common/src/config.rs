//! TOML configuration loading
//!
//! Each option resolves with the priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Tiers 1 and 2 are handled by the binary's argument parser; this module
//! owns tier 3 and the file discovery rules.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file name searched for in the platform config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the platform config directory
pub const CONFIG_DIR_NAME: &str = "fieldrec";

/// On-disk TOML configuration. Every field is optional; absent fields fall
/// through to compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Address the HTTP service binds to
    pub bind: Option<String>,
    /// Directory containing the source recordings
    pub audio_root: Option<PathBuf>,
    /// Directory spectrogram images are written under
    pub spectro_root: Option<PathBuf>,
    /// Directory peaks and stats artifacts are written under
    pub cache_dir: Option<PathBuf>,
    /// JSON document holding batch progress
    pub progress_file: Option<PathBuf>,
    /// External tool locations
    pub tools: ToolsConfig,
    /// Batch / peaks job tuning
    pub jobs: JobsConfig,
}

/// Paths of external executables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub audiowaveform: Option<String>,
    pub ffmpeg: Option<String>,
    pub ffprobe: Option<String>,
    /// Per-invocation timeout; absent means no timeout
    pub timeout_secs: Option<u64>,
}

/// Job tuning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub batch_concurrency: Option<usize>,
    pub peaks_concurrency: Option<usize>,
    pub peaks_pixels_per_second: Option<u32>,
    pub peaks_bits: Option<u8>,
}

/// Default config file location (`~/.config/fieldrec/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load the TOML config.
///
/// An explicit path must exist. Without one, the default location is tried
/// and a missing file yields defaults with a warning rather than an error.
/// A file that exists but does not parse is always a [`Error::Config`].
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            Some(path) => {
                warn!(
                    "No config file at {}, using environment and defaults",
                    path.display()
                );
                return Ok(TomlConfig::default());
            }
            None => {
                warn!("Could not determine config directory, using environment and defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = parse_toml_config(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded config file {}", path.display());
    Ok(config)
}

/// Parse TOML text into a [`TomlConfig`]
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

/// Write the config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let text = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    crate::fs::write_atomic_blocking(path, text.as_bytes())
}

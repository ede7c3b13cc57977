//! Command lines of the external tools

use crate::services::tool_runner::ToolInvocation;
use std::path::Path;

/// Batch spectrogram filter graph: high-passed grey overview at fixed size
const OVERVIEW_FILTER: &str =
    "highpass=f=120,showspectrum=s=1920x480:mode=combined:scale=log:drange=45:color=gray";

/// Executable names/paths of the tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommands {
    pub audiowaveform: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            audiowaveform: "audiowaveform".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl ToolCommands {
    /// Waveform peaks. The output format follows the `.json` extension.
    pub fn peaks(&self, source: &Path, output: &Path, pixels_per_second: u32, bits: u8) -> ToolInvocation {
        ToolInvocation::new(&self.audiowaveform)
            .arg("-i")
            .arg(source)
            .arg("-o")
            .arg(output)
            .arg("--pixels-per-second")
            .arg(pixels_per_second.to_string())
            .arg("-b")
            .arg(bits.to_string())
    }

    /// Full-timeline spectrogram picture at an explicit size
    pub fn spectrogram_picture(&self, source: &Path, output: &Path, width: u32, height: u32) -> ToolInvocation {
        let filter = format!(
            "showspectrumpic=s={}x{}:legend=disabled:color=intensity:scale=log",
            width, height
        );
        ToolInvocation::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(source)
            .arg("-lavfi")
            .arg(filter)
            .arg(output)
    }

    /// Fixed-size overview frame used by batch jobs
    pub fn spectrogram_overview(&self, source: &Path, output: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(source)
            .arg("-lavfi")
            .arg(OVERVIEW_FILTER)
            .args(["-frames:v", "1"])
            .arg(output)
    }

    /// Container duration in seconds on stdout
    pub fn probe_duration(&self, source: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(source)
    }
}

/// Parse `probe_duration` stdout; None for anything but a positive number
pub fn parse_duration(stdout: &[u8]) -> Option<f64> {
    let seconds: f64 = std::str::from_utf8(stdout).ok()?.trim().parse().ok()?;
    (seconds.is_finite() && seconds > 0.0).then_some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn peaks_command_line() {
        let invocation = ToolCommands::default().peaks(
            Path::new("/audio/a.wav"),
            Path::new("/cache/peaks/a.peaks.json"),
            50,
            8,
        );
        assert_eq!(
            invocation.display(),
            "audiowaveform -i /audio/a.wav -o /cache/peaks/a.peaks.json --pixels-per-second 50 -b 8"
        );
    }

    #[test]
    fn spectrogram_picture_embeds_size() {
        let invocation = ToolCommands::default().spectrogram_picture(
            Path::new("in.wav"),
            Path::new("out.png"),
            600,
            480,
        );
        assert_eq!(invocation.program, "ffmpeg");
        assert_eq!(
            invocation.arg_after("-lavfi"),
            Some(&OsString::from(
                "showspectrumpic=s=600x480:legend=disabled:color=intensity:scale=log"
            ))
        );
        assert_eq!(invocation.args.last(), Some(&OsString::from("out.png")));
    }

    #[test]
    fn overview_renders_single_frame() {
        let invocation =
            ToolCommands::default().spectrogram_overview(Path::new("in.wav"), Path::new("out.png"));
        assert_eq!(invocation.arg_after("-frames:v"), Some(&OsString::from("1")));
        assert_eq!(invocation.arg_after("-lavfi"), Some(&OsString::from(OVERVIEW_FILTER)));
    }

    #[test]
    fn parses_probe_output() {
        assert_eq!(parse_duration(b"5.000000\n"), Some(5.0));
        assert_eq!(parse_duration(b"N/A\n"), None);
        assert_eq!(parse_duration(b"0"), None);
        assert_eq!(parse_duration(b""), None);
    }
}

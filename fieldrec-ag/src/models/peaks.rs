//! Waveform peaks and the activity statistics derived from them

use serde::{Deserialize, Serialize};

/// Current layout version of [`PeakStats`]
pub const PEAK_STATS_VERSION: u32 = 1;

/// audiowaveform JSON output
///
/// Only `sample_rate`, `samples_per_pixel` and `data` feed the statistics;
/// the remaining fields are carried so the file can be re-served unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeaksData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(default, alias = "sampleRate")]
    pub sample_rate: u32,
    #[serde(default, alias = "samplesPerPixel")]
    pub samples_per_pixel: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default)]
    pub data: Vec<i32>,
}

impl PeaksData {
    /// Peaks with just the fields the statistics need
    pub fn new(sample_rate: u32, samples_per_pixel: u32, data: Vec<i32>) -> Self {
        Self {
            version: None,
            channels: None,
            sample_rate,
            samples_per_pixel,
            bits: None,
            length: None,
            data,
        }
    }

    /// Recording duration implied by the peaks, 0 when the header is incomplete
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.samples_per_pixel == 0 {
            return 0.0;
        }
        (self.data.len() as f64 * self.samples_per_pixel as f64) / self.sample_rate as f64
    }
}

/// Activity summary of one recording (the Stats artifact)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakStats {
    pub version: u32,
    pub samples_per_pixel: u32,
    /// Number of peak points
    pub length: usize,
    #[serde(alias = "durationS")]
    pub duration_seconds: f64,
    /// Mean amplitude, 0..255
    pub mean: f64,
    /// 95th percentile amplitude, 0..255
    pub p95: u8,
    /// Maximum amplitude, 0..255
    pub max: u8,
    /// Fraction of points at or above `threshold`
    pub active_ratio: f64,
    pub active_seconds: f64,
    /// Adaptive noise floor used for `active_ratio`
    pub threshold: u8,
    /// 0..100 sorting/colouring aid
    pub score: u8,
}

/// Stats plus the derived fields list views sort and filter on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    #[serde(flatten)]
    pub stats: PeakStats,
    /// `active_ratio` as a percentage
    pub activity_pct: f64,
    pub likely_sound: bool,
}

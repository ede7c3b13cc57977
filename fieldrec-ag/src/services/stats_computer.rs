//! Activity statistics from waveform peaks
//!
//! Pure and deterministic: no I/O, same input → same output.

use crate::models::{ActivitySummary, PeakStats, PeaksData, PEAK_STATS_VERSION};

/// Absolute floor of the adaptive threshold
const THRESHOLD_FLOOR: f64 = 3.0;
/// Minimum of the p95-relative term before the floor applies
const THRESHOLD_P95_MIN: f64 = 10.0;
/// Offset below p95 that still counts as background
const THRESHOLD_P95_OFFSET: f64 = 5.0;

/// Activity percentage at which a recording is "likely sound"
const LIKELY_SOUND_ACTIVITY_PCT: f64 = 0.5;
/// p95 at which even a quiet recording is "likely sound"
const LIKELY_SOUND_P95: u8 = 3;

/// Compute [`PeakStats`] from peaks.
///
/// Uses a 256-bucket histogram, so the percentile is O(256) after one
/// O(n) pass. 16-bit peaks are scaled down to 8-bit first; amplitudes are
/// then clamped to 0..=255.
pub fn compute_stats(peaks: &PeaksData) -> PeakStats {
    let len = peaks.data.len();
    let duration_seconds = peaks.duration_seconds();
    let shift = if peaks.bits == Some(16) { 8 } else { 0 };

    let mut histogram = [0u64; 256];
    let mut sum = 0u64;
    let mut max = 0u8;
    for &raw in &peaks.data {
        let v = (raw >> shift).clamp(0, 255) as u8;
        histogram[v as usize] += 1;
        sum += v as u64;
        max = max.max(v);
    }
    let mean = if len > 0 { sum as f64 / len as f64 } else { 0.0 };

    let p95 = percentile(&histogram, len, 0.95);

    let threshold = (f64::from(p95) - THRESHOLD_P95_OFFSET)
        .max(THRESHOLD_P95_MIN)
        .round()
        .max(THRESHOLD_FLOOR)
        .min(255.0) as u8;

    let active_count: u64 = histogram[threshold as usize..].iter().sum();
    let active_ratio = if len > 0 {
        active_count as f64 / len as f64
    } else {
        0.0
    };
    let active_seconds = active_ratio * duration_seconds;

    PeakStats {
        version: PEAK_STATS_VERSION,
        samples_per_pixel: peaks.samples_per_pixel,
        length: len,
        duration_seconds,
        mean,
        p95,
        max,
        active_ratio,
        active_seconds,
        threshold,
        score: activity_score(active_ratio, p95, max),
    }
}

/// 0..100 score, monotonic in activity and bounded.
fn activity_score(active_ratio: f64, p95: u8, max: u8) -> u8 {
    let loudness = f64::from(p95) / 64.0 + f64::from(max) / 128.0;
    (active_ratio * 100.0 * loudness).min(100.0).round() as u8
}

/// Smallest value whose cumulative count reaches `fraction` of `total`
fn percentile(histogram: &[u64; 256], total: usize, fraction: f64) -> u8 {
    let target = (total as f64 * fraction).ceil() as u64;
    let mut cumulative = 0u64;
    for (value, count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return value as u8;
        }
    }
    255
}

/// Attach the list-view fields to computed stats
pub fn summarize(stats: PeakStats) -> ActivitySummary {
    let activity_pct = stats.active_ratio * 100.0;
    let likely_sound = activity_pct >= LIKELY_SOUND_ACTIVITY_PCT || stats.p95 >= LIKELY_SOUND_P95;
    ActivitySummary {
        stats,
        activity_pct,
        likely_sound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peaks(data: Vec<i32>) -> PeaksData {
        PeaksData::new(44_100, 1000, data)
    }

    #[test]
    fn silent_recording() {
        let stats = compute_stats(&peaks(vec![0; 100]));

        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.p95, 0);
        assert_eq!(stats.max, 0);
        assert_eq!(stats.threshold, 10);
        assert_eq!(stats.active_ratio, 0.0);
        assert_eq!(stats.active_seconds, 0.0);
        assert_eq!(stats.score, 0);
        assert_eq!(stats.length, 100);
        assert!((stats.duration_seconds - 2.2676).abs() < 1e-3);
    }

    #[test]
    fn saturated_recording() {
        let stats = compute_stats(&peaks(vec![255; 40]));

        assert_eq!(stats.p95, 255);
        assert_eq!(stats.max, 255);
        assert_eq!(stats.threshold, 250);
        assert_eq!(stats.active_ratio, 1.0);
        assert_eq!(stats.score, 100);
        assert!((stats.active_seconds - stats.duration_seconds).abs() < 1e-12);
    }

    #[test]
    fn percentile_uses_cumulative_histogram() {
        // 95 quiet points, 5 loud: p95 lands on the quiet value
        let mut data = vec![2; 95];
        data.extend([200; 5]);
        let stats = compute_stats(&peaks(data));

        assert_eq!(stats.p95, 2);
        assert_eq!(stats.max, 200);
        assert_eq!(stats.threshold, 10);
        assert!((stats.active_ratio - 0.05).abs() < 1e-12);
        assert!((stats.mean - 11.9).abs() < 1e-9);
        // 5 * (2/64 + 200/128) = 7.96 → 8
        assert_eq!(stats.score, 8);
    }

    #[test]
    fn threshold_tracks_noisy_background() {
        let stats = compute_stats(&peaks(vec![60; 50]));
        assert_eq!(stats.p95, 60);
        assert_eq!(stats.threshold, 55);
        assert_eq!(stats.active_ratio, 1.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let stats = compute_stats(&peaks(vec![-20, 300, 0, 0]));
        assert_eq!(stats.max, 255);
        assert_eq!(stats.mean, 255.0 / 4.0);
    }

    #[test]
    fn sixteen_bit_peaks_are_scaled_to_eight_bit() {
        let mut wide = peaks(vec![60 * 256; 50]);
        wide.bits = Some(16);
        let stats = compute_stats(&wide);
        assert_eq!(stats.p95, 60);
        assert_eq!(stats.max, 60);
        assert_eq!(stats.threshold, 55);
        assert_eq!(stats, compute_stats(&peaks(vec![60; 50])));

        let mut extremes = peaks(vec![-32768, 32767, 0, 0]);
        extremes.bits = Some(16);
        assert_eq!(compute_stats(&extremes).max, 127);
    }

    #[test]
    fn empty_and_headerless_peaks() {
        let stats = compute_stats(&PeaksData::new(0, 0, Vec::new()));
        assert_eq!(stats.length, 0);
        assert_eq!(stats.duration_seconds, 0.0);
        assert_eq!(stats.active_ratio, 0.0);
        assert_eq!(stats.score, 0);
    }

    #[test]
    fn deterministic() {
        let input = peaks((0..500).map(|i| (i * 7 % 256) as i32).collect());
        assert_eq!(compute_stats(&input), compute_stats(&input));
    }

    #[test]
    fn summary_flags_quiet_but_nonzero_recordings() {
        let quiet = summarize(compute_stats(&peaks(vec![4; 20])));
        assert_eq!(quiet.activity_pct, 0.0);
        assert!(quiet.likely_sound, "p95 >= 3 counts as sound");

        let silent = summarize(compute_stats(&peaks(vec![0; 20])));
        assert!(!silent.likely_sound);
    }
}

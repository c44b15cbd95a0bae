use std::ops::RangeInclusive;

use pulse_domain::{BpmResult, DEFAULT_BPM};
use tracing::debug;

/// Fewer onsets than this cannot produce a meaningful estimate.
pub const MIN_ONSETS: usize = 4;
/// Inter-onset intervals outside this open range (seconds) are noise.
pub const INTERVAL_BOUNDS_SECS: (f64, f64) = (0.1, 2.0);
/// Tempi the histogram will vote for.
pub const DETECTABLE_BPM: RangeInclusive<u32> = 40..=220;

/// Onset-interval histogram.
///
/// Every usable interval votes for its tempo and for half and double that
/// tempo, which absorbs detectors firing on backbeats or subdivisions.
/// Equal vote counts keep first-vote order.
#[derive(Debug, Default, Clone, Copy)]
pub struct TempoEstimator;

impl TempoEstimator {
    pub fn estimate(&self, onsets: &[f64]) -> BpmResult {
        if onsets.len() < MIN_ONSETS {
            debug!(onsets = onsets.len(), "too few onsets for tempo estimate");
            return BpmResult::insufficient_data();
        }

        let (low, high) = INTERVAL_BOUNDS_SECS;
        let intervals: Vec<f64> = onsets
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|&interval| interval > low && interval < high)
            .collect();
        if intervals.is_empty() {
            debug!(onsets = onsets.len(), "no plausible inter-onset intervals");
            return BpmResult::insufficient_data();
        }

        let mut histogram: Vec<(u32, u32)> = Vec::new();
        for interval in &intervals {
            let raw = (60.0 / interval).floor() as u32;
            for candidate in [raw, raw / 2, raw * 2] {
                if !DETECTABLE_BPM.contains(&candidate) {
                    continue;
                }
                match histogram.iter_mut().find(|(bpm, _)| *bpm == candidate) {
                    Some((_, votes)) => *votes += 1,
                    None => histogram.push((candidate, 1)),
                }
            }
        }
        // Stable sort: ties stay in first-vote order.
        histogram.sort_by(|a, b| b.1.cmp(&a.1));

        let (bpm, top_votes) = histogram.first().copied().unwrap_or((DEFAULT_BPM, 0));
        let confidence = top_votes as f32 / intervals.len() as f32;
        let candidates = histogram
            .iter()
            .take(BpmResult::MAX_CANDIDATES)
            .map(|(bpm, _)| *bpm)
            .collect();
        debug!(
            bpm,
            confidence,
            intervals = intervals.len(),
            "onset histogram estimate"
        );
        BpmResult::new(bpm, confidence, candidates)
    }
}

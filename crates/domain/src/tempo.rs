use serde::{Deserialize, Serialize};

/// Slowest tempo the metronome accepts.
pub const MIN_BPM: u32 = 20;
/// Fastest tempo the metronome accepts.
pub const MAX_BPM: u32 = 300;
pub const DEFAULT_BPM: u32 = 120;

/// Clamps any requested tempo into `[MIN_BPM, MAX_BPM]`.
///
/// Out-of-range requests are never rejected; `500` becomes `300` and
/// negative values become `20`.
pub fn clamp_bpm(bpm: i64) -> u32 {
    bpm.clamp(MIN_BPM as i64, MAX_BPM as i64) as u32
}

/// Milliseconds per beat, using integer division (`60000 / bpm`).
pub fn interval_ms(bpm: u32) -> u64 {
    60_000 / u64::from(bpm.max(1))
}

/// Outcome of one tempo analysis run.
///
/// Low confidence is the failure signal: anything at or below
/// [`BpmResult::UNRELIABLE_CONFIDENCE`] should be presented as
/// "detection failed" rather than as a tempo.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BpmResult {
    pub bpm: u32,
    /// In `[0, 1]`.
    pub confidence: f32,
    /// Up to [`BpmResult::MAX_CANDIDATES`] tempi, most likely first.
    pub candidates: Vec<u32>,
}

impl BpmResult {
    pub const MAX_CANDIDATES: usize = 5;
    pub const UNRELIABLE_CONFIDENCE: f32 = 0.3;

    pub fn new(bpm: u32, confidence: f32, mut candidates: Vec<u32>) -> Self {
        candidates.truncate(Self::MAX_CANDIDATES);
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            bpm,
            confidence,
            candidates,
        }
    }

    pub fn single(bpm: u32, confidence: f32) -> Self {
        Self::new(bpm, confidence, vec![bpm])
    }

    /// Returned by the onset histogram when the trace is too short or too noisy.
    pub fn insufficient_data() -> Self {
        Self::single(DEFAULT_BPM, 0.5)
    }

    /// Returned by the energy fallback when it cannot find a pulse.
    pub fn fallback_default() -> Self {
        Self::single(DEFAULT_BPM, Self::UNRELIABLE_CONFIDENCE)
    }

    pub fn is_reliable(&self) -> bool {
        self.confidence > Self::UNRELIABLE_CONFIDENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bpm_bounds() {
        assert_eq!(clamp_bpm(20), 20);
        assert_eq!(clamp_bpm(300), 300);
        assert_eq!(clamp_bpm(19), 20);
        assert_eq!(clamp_bpm(301), 300);
        assert_eq!(clamp_bpm(-5), 20);
        assert_eq!(clamp_bpm(i64::MAX), 300);
    }

    #[test]
    fn interval_uses_integer_division() {
        assert_eq!(interval_ms(120), 500);
        assert_eq!(interval_ms(90), 666);
        assert_eq!(interval_ms(300), 200);
    }

    #[test]
    fn result_defaults_differ_in_confidence() {
        let primary = BpmResult::insufficient_data();
        let fallback = BpmResult::fallback_default();
        assert_eq!(primary.bpm, 120);
        assert_eq!(primary.candidates, vec![120]);
        assert!(primary.is_reliable());
        assert_eq!(fallback.bpm, 120);
        assert!(!fallback.is_reliable());
    }

    #[test]
    fn result_new_clamps_and_truncates() {
        let result = BpmResult::new(100, 1.7, vec![100, 50, 200, 99, 101, 98]);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.candidates.len(), BpmResult::MAX_CANDIDATES);
        assert_eq!(BpmResult::new(100, f32::NAN, vec![]).confidence, 0.0);
    }
}

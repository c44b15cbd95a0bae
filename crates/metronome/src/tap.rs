use std::collections::VecDeque;

use pulse_domain::{clamp_bpm, MetronomeConfig, MAX_BPM};
use tracing::debug;

/// Sliding window of taps used for the estimate.
pub const MAX_TAPS: usize = 8;
/// A longer pause between two taps starts a new session.
pub const SESSION_GAP_MS: u64 = 2000;

/// Derives a tempo from the spacing of user taps.
#[derive(Clone, Debug, Default)]
pub struct TapTempoTracker {
    taps: VecDeque<u64>,
}

impl TapTempoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tap at `now_ms` and, once two taps exist, writes the new
    /// tempo into `config`.
    ///
    /// Returns the tempo now in effect: the fresh estimate, or the unchanged
    /// config tempo when there is not enough history.
    pub fn tap(&mut self, now_ms: u64, config: &mut MetronomeConfig) -> u32 {
        if let Some(bpm) = self.register(now_ms) {
            config.set_bpm(i64::from(bpm));
        }
        config.bpm()
    }

    /// Registers a tap without touching any configuration.
    pub fn register(&mut self, now_ms: u64) -> Option<u32> {
        if let Some(&last) = self.taps.back() {
            if now_ms.saturating_sub(last) > SESSION_GAP_MS {
                debug!(gap_ms = now_ms - last, "tap session expired");
                self.taps.clear();
            }
        }
        self.taps.push_back(now_ms);
        while self.taps.len() > MAX_TAPS {
            self.taps.pop_front();
        }
        if self.taps.len() < 2 {
            return None;
        }

        let total: i64 = self
            .taps
            .iter()
            .zip(self.taps.iter().skip(1))
            .map(|(&earlier, &later)| later as i64 - earlier as i64)
            .sum();
        let mean = total as f64 / (self.taps.len() - 1) as f64;
        let bpm = if mean <= 0.0 {
            MAX_BPM
        } else {
            clamp_bpm((60_000.0 / mean).round() as i64)
        };
        debug!(taps = self.taps.len(), mean_ms = mean, bpm, "tap tempo");
        Some(bpm)
    }

    /// Forgets all taps; the configured tempo is left alone.
    pub fn clear(&mut self) {
        self.taps.clear();
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_even_taps_are_120() {
        let mut tracker = TapTempoTracker::new();
        let mut config = MetronomeConfig::default();
        config.set_bpm(90);
        let results: Vec<u32> = [0, 500, 1000, 1500]
            .into_iter()
            .map(|t| tracker.tap(t, &mut config))
            .collect();
        assert_eq!(results, vec![90, 120, 120, 120]);
        assert_eq!(config.bpm(), 120);
    }

    #[test]
    fn single_tap_keeps_previous_tempo() {
        let mut tracker = TapTempoTracker::new();
        let mut config = MetronomeConfig::default();
        config.set_bpm(77);
        assert_eq!(tracker.tap(10_000, &mut config), 77);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn long_gap_starts_new_session() {
        let mut tracker = TapTempoTracker::new();
        let mut config = MetronomeConfig::default();
        tracker.tap(0, &mut config);
        assert_eq!(tracker.tap(400, &mut config), 150);

        assert_eq!(tracker.tap(2900, &mut config), 150);
        assert_eq!(tracker.len(), 1);
        assert_eq!(config.bpm(), 150);
    }

    #[test]
    fn gap_of_exactly_two_seconds_continues_session() {
        let mut tracker = TapTempoTracker::new();
        tracker.register(0);
        assert_eq!(tracker.register(2000), Some(30));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn window_keeps_latest_eight() {
        let mut tracker = TapTempoTracker::new();
        for i in 0..5 {
            tracker.register(i * 1000);
        }
        let mut last = None;
        for i in 0..8 {
            last = tracker.register(5000 + i * 250);
        }
        assert_eq!(tracker.len(), MAX_TAPS);
        assert_eq!(last, Some(240));
    }

    #[test]
    fn estimate_is_rounded_and_clamped() {
        let mut tracker = TapTempoTracker::new();
        tracker.register(0);
        assert_eq!(tracker.register(700), Some(86));

        tracker.clear();
        tracker.register(0);
        assert_eq!(tracker.register(100), Some(300));

        tracker.clear();
        tracker.register(50);
        assert_eq!(tracker.register(50), Some(300));
    }

    #[test]
    fn clear_leaves_config_alone() {
        let mut tracker = TapTempoTracker::new();
        let mut config = MetronomeConfig::default();
        tracker.tap(0, &mut config);
        tracker.tap(600, &mut config);
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(config.bpm(), 100);
    }
}

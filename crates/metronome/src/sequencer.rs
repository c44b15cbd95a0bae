use std::time::Duration;

use pulse_domain::{ClickEvent, MetronomeConfig, MetronomePhase};

/// One click plus how long to wait before the next one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub event: ClickEvent,
    pub wait: Duration,
}

/// Tick arithmetic of the metronome, free of threads and clocks.
///
/// The configuration is passed in on every call, so tempo and grid changes
/// apply from the next tick on.
#[derive(Clone, Debug, Default)]
pub struct Sequencer {
    next: MetronomePhase,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the click the next call will emit.
    pub fn phase(&self) -> MetronomePhase {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = MetronomePhase::START;
    }

    pub fn next_tick(&mut self, config: &MetronomeConfig) -> Tick {
        let subdivision = config.subdivision();
        let clicks = subdivision.clicks_per_beat();
        let beats = config.beats_per_measure();

        let phase = self.next.normalized(clicks, beats);
        let interval_ms = subdivision.interval_ms(config.interval_ms(), phase.subdivision);
        let wait_ms = interval_ms.saturating_sub(config.compensation_ms());
        let event = ClickEvent::new(phase, config);

        self.next = phase.advanced(clicks, beats);
        Tick {
            event,
            wait: Duration::from_millis(wait_ms),
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::metronome::{MetronomeConfig, MetronomePhase};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClickKind {
    Accent,
    Main,
    Subdivision,
}

/// One scheduled tick, handed to the audio output and to observers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClickEvent {
    pub beat_index: u32,
    pub subdivision_index: u32,
    pub is_accent: bool,
    pub is_main_beat: bool,
    pub gain_main: f32,
    pub gain_sub: f32,
    pub pitch_multiplier: f32,
}

impl ClickEvent {
    pub fn new(phase: MetronomePhase, config: &MetronomeConfig) -> Self {
        let is_main_beat = phase.is_main_beat();
        Self {
            beat_index: phase.beat,
            subdivision_index: phase.subdivision,
            is_accent: is_main_beat && phase.beat == 0 && config.accent_first_beat(),
            is_main_beat,
            gain_main: config.volume(),
            gain_sub: config.subdivision_volume(),
            pitch_multiplier: config.subdivision().pitch_multiplier(),
        }
    }

    pub fn kind(&self) -> ClickKind {
        if self.is_accent {
            ClickKind::Accent
        } else if self.is_main_beat {
            ClickKind::Main
        } else {
            ClickKind::Subdivision
        }
    }

    /// Gain for this click: main-beat volume or subdivision volume.
    pub fn gain(&self) -> f32 {
        if self.is_main_beat {
            self.gain_main
        } else {
            self.gain_sub
        }
    }

    pub fn is_subdivision(&self) -> bool {
        !self.is_main_beat
    }

    pub fn phase(&self) -> MetronomePhase {
        MetronomePhase::new(self.beat_index, self.subdivision_index)
    }

    pub fn notice(&self) -> BeatNotice {
        BeatNotice {
            beat_index: self.beat_index,
            is_accent: self.is_accent,
            is_subdivision: self.is_subdivision(),
        }
    }
}

/// What a beat observer (UI pulse, recorder sync) receives per tick.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeatNotice {
    pub beat_index: u32,
    pub is_accent: bool,
    pub is_subdivision: bool,
}

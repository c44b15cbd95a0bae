pub mod error;
pub mod events;
pub mod metronome;
pub mod settings;
pub mod tempo;

pub use crate::error::DomainError;
pub use crate::events::{BeatNotice, ClickEvent, ClickKind};
pub use crate::metronome::{ClickStyle, MetronomeConfig, MetronomePhase, Subdivision};
pub use crate::settings::{FileSettingsStore, PracticeSettings, SettingsFormat, SettingsStore};
pub use crate::tempo::{clamp_bpm, interval_ms, BpmResult, DEFAULT_BPM, MAX_BPM, MIN_BPM};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tempo::{clamp_bpm, interval_ms, DEFAULT_BPM};
use crate::DomainError;

pub const MIN_BEATS_PER_MEASURE: u32 = 1;
pub const MAX_BEATS_PER_MEASURE: u32 = 12;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Subdivision {
    #[default]
    Quarter,
    Eighth,
    EighthTriplet,
    Sixteenth,
    SixteenthTriplet,
    ThirtySecond,
    /// Two clicks per beat with a long-short feel.
    Swing,
}

impl Subdivision {
    pub const ALL: [Subdivision; 7] = [
        Subdivision::Quarter,
        Subdivision::Eighth,
        Subdivision::EighthTriplet,
        Subdivision::Sixteenth,
        Subdivision::SixteenthTriplet,
        Subdivision::ThirtySecond,
        Subdivision::Swing,
    ];

    pub fn clicks_per_beat(self) -> u32 {
        match self {
            Subdivision::Quarter => 1,
            Subdivision::Eighth => 2,
            Subdivision::EighthTriplet => 3,
            Subdivision::Sixteenth => 4,
            Subdivision::SixteenthTriplet => 6,
            Subdivision::ThirtySecond => 8,
            Subdivision::Swing => 2,
        }
    }

    /// Pitch scale applied to subdivision clicks; finer grids sound lower.
    pub fn pitch_multiplier(self) -> f32 {
        match self {
            Subdivision::Quarter => 1.0,
            Subdivision::Eighth => 0.8,
            Subdivision::EighthTriplet => 0.75,
            Subdivision::Sixteenth => 0.7,
            Subdivision::SixteenthTriplet => 0.65,
            Subdivision::ThirtySecond => 0.6,
            Subdivision::Swing => 0.8,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Subdivision::Quarter => "Quarter",
            Subdivision::Eighth => "8th",
            Subdivision::EighthTriplet => "8th Triplet",
            Subdivision::Sixteenth => "16th",
            Subdivision::SixteenthTriplet => "16th Triplet",
            Subdivision::ThirtySecond => "32nd",
            Subdivision::Swing => "Swing",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Subdivision::Quarter => "QUARTER",
            Subdivision::Eighth => "EIGHTH",
            Subdivision::EighthTriplet => "EIGHTH_TRIPLET",
            Subdivision::Sixteenth => "SIXTEENTH",
            Subdivision::SixteenthTriplet => "SIXTEENTH_TRIPLET",
            Subdivision::ThirtySecond => "THIRTY_SECOND",
            Subdivision::Swing => "SWING",
        }
    }

    pub fn is_swing(self) -> bool {
        self == Subdivision::Swing
    }

    /// Wait after the click at `index` within a beat of `beat_interval_ms`.
    ///
    /// Swing alternates a long `2/3` click with the remainder of the beat, so
    /// a swung pair always adds up to exactly one beat.
    pub fn interval_ms(self, beat_interval_ms: u64, index: u32) -> u64 {
        if self.is_swing() {
            let long = beat_interval_ms * 2 / 3;
            if index % 2 == 0 {
                long
            } else {
                beat_interval_ms - long
            }
        } else {
            beat_interval_ms / u64::from(self.clicks_per_beat())
        }
    }
}

impl fmt::Display for Subdivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Subdivision {
    type Err = DomainError;

    /// Accepts enum names (`EIGHTH_TRIPLET`, `eighth-triplet`) and display
    /// names (`8th Triplet`), case-insensitively.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|sub| {
                sub.name() == wanted
                    || sub.display_name().to_ascii_uppercase().replace(' ', "_") == wanted
            })
            .ok_or_else(|| DomainError::validation(format!("unknown subdivision `{value}`")))
    }
}

/// Pre-rendered click sample set.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClickStyle {
    #[default]
    #[serde(rename = "STYLE_1")]
    Style1,
    #[serde(rename = "STYLE_2")]
    Style2,
}

impl ClickStyle {
    pub fn display_name(self) -> &'static str {
        match self {
            ClickStyle::Style1 => "Style 1",
            ClickStyle::Style2 => "Style 2",
        }
    }

    pub fn click_file(self) -> &'static str {
        match self {
            ClickStyle::Style1 => "click1.mp3",
            ClickStyle::Style2 => "click2.mp3",
        }
    }

    pub fn accent_file(self) -> &'static str {
        match self {
            ClickStyle::Style1 => "click_accent1.mp3",
            ClickStyle::Style2 => "click_accent2.mp3",
        }
    }

    pub fn subdivision_file(self) -> &'static str {
        match self {
            ClickStyle::Style1 => "click1_sub.mp3",
            ClickStyle::Style2 => "click2_sub.mp3",
        }
    }
}

impl FromStr for ClickStyle {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "style1" | "1" => Ok(ClickStyle::Style1),
            "style2" | "2" => Ok(ClickStyle::Style2),
            _ => Err(DomainError::validation(format!("unknown click style `{value}`"))),
        }
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Live metronome settings.
///
/// Every setter clamps instead of failing, so any value read back is in range.
/// Stored settings come back through [`crate::PracticeSettings::metronome_config`].
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct MetronomeConfig {
    bpm: u32,
    beats_per_measure: u32,
    subdivision: Subdivision,
    click_style: ClickStyle,
    accent_first_beat: bool,
    volume: f32,
    subdivision_volume: f32,
    latency_offset_ms: i64,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            beats_per_measure: 4,
            subdivision: Subdivision::Quarter,
            click_style: ClickStyle::Style1,
            accent_first_beat: true,
            volume: 0.8,
            subdivision_volume: 0.5,
            latency_offset_ms: 0,
        }
    }
}

impl MetronomeConfig {
    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: i64) {
        self.bpm = clamp_bpm(bpm);
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    pub fn set_beats_per_measure(&mut self, beats: i64) {
        self.beats_per_measure = beats.clamp(
            i64::from(MIN_BEATS_PER_MEASURE),
            i64::from(MAX_BEATS_PER_MEASURE),
        ) as u32;
    }

    pub fn subdivision(&self) -> Subdivision {
        self.subdivision
    }

    pub fn set_subdivision(&mut self, subdivision: Subdivision) {
        self.subdivision = subdivision;
    }

    pub fn click_style(&self) -> ClickStyle {
        self.click_style
    }

    pub fn set_click_style(&mut self, style: ClickStyle) {
        self.click_style = style;
    }

    pub fn accent_first_beat(&self) -> bool {
        self.accent_first_beat
    }

    pub fn set_accent_first_beat(&mut self, accent: bool) {
        self.accent_first_beat = accent;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_unit(volume);
    }

    pub fn subdivision_volume(&self) -> f32 {
        self.subdivision_volume
    }

    pub fn set_subdivision_volume(&mut self, volume: f32) {
        self.subdivision_volume = clamp_unit(volume);
    }

    pub fn latency_offset_ms(&self) -> i64 {
        self.latency_offset_ms
    }

    pub fn set_latency_offset_ms(&mut self, offset_ms: i64) {
        self.latency_offset_ms = offset_ms;
    }

    /// Milliseconds per beat (`60000 / bpm`).
    pub fn interval_ms(&self) -> u64 {
        interval_ms(self.bpm)
    }

    /// Latency compensation actually applied; negative offsets count as zero.
    pub fn compensation_ms(&self) -> u64 {
        self.latency_offset_ms.max(0) as u64
    }
}

/// Position of the next (or current) click inside the measure.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetronomePhase {
    pub beat: u32,
    pub subdivision: u32,
}

impl MetronomePhase {
    pub const START: MetronomePhase = MetronomePhase {
        beat: 0,
        subdivision: 0,
    };

    pub fn new(beat: u32, subdivision: u32) -> Self {
        Self { beat, subdivision }
    }

    /// Pulls a phase left over from an older configuration back into range.
    ///
    /// A subdivision index past the new grid counts as a finished beat.
    pub fn normalized(self, clicks_per_beat: u32, beats_per_measure: u32) -> Self {
        let clicks = clicks_per_beat.max(1);
        let beats = beats_per_measure.max(1);
        if self.subdivision >= clicks {
            Self::new((self.beat + 1) % beats, 0)
        } else {
            Self::new(self.beat % beats, self.subdivision)
        }
    }

    pub fn advanced(self, clicks_per_beat: u32, beats_per_measure: u32) -> Self {
        let next = self.subdivision + 1;
        if next >= clicks_per_beat.max(1) {
            Self::new((self.beat + 1) % beats_per_measure.max(1), 0)
        } else {
            Self::new(self.beat, next)
        }
    }

    pub fn is_main_beat(&self) -> bool {
        self.subdivision == 0
    }

    /// Packs both indices into one word so readers never see half an update.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.beat) << 32) | u64::from(self.subdivision)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self::new((bits >> 32) as u32, bits as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdivision_clicks_per_beat() {
        let clicks: Vec<u32> = Subdivision::ALL
            .iter()
            .map(|sub| sub.clicks_per_beat())
            .collect();
        assert_eq!(clicks, vec![1, 2, 3, 4, 6, 8, 2]);
    }

    #[test]
    fn straight_subdivision_intervals() {
        assert_eq!(Subdivision::Quarter.interval_ms(500, 0), 500);
        assert_eq!(Subdivision::Eighth.interval_ms(500, 0), 250);
        assert_eq!(Subdivision::Eighth.interval_ms(500, 1), 250);
        assert_eq!(Subdivision::EighthTriplet.interval_ms(500, 2), 166);
    }

    #[test]
    fn swing_alternates_long_short() {
        assert_eq!(Subdivision::Swing.interval_ms(500, 0), 333);
        assert_eq!(Subdivision::Swing.interval_ms(500, 1), 167);
        assert_eq!(Subdivision::Swing.interval_ms(500, 2), 333);
    }

    #[test]
    fn subdivision_parses_names() {
        assert_eq!(
            "EIGHTH_TRIPLET".parse::<Subdivision>().unwrap(),
            Subdivision::EighthTriplet
        );
        assert_eq!("16th".parse::<Subdivision>().unwrap(), Subdivision::Sixteenth);
        assert_eq!(
            "thirty-second".parse::<Subdivision>().unwrap(),
            Subdivision::ThirtySecond
        );
        assert_eq!("swing".parse::<Subdivision>().unwrap(), Subdivision::Swing);
        assert!("dotted".parse::<Subdivision>().is_err());
    }

    #[test]
    fn config_setters_clamp() {
        let mut config = MetronomeConfig::default();
        config.set_bpm(500);
        assert_eq!(config.bpm(), 300);
        config.set_bpm(19);
        assert_eq!(config.bpm(), 20);
        config.set_beats_per_measure(0);
        assert_eq!(config.beats_per_measure(), 1);
        config.set_beats_per_measure(13);
        assert_eq!(config.beats_per_measure(), 12);
        config.set_volume(1.5);
        assert_eq!(config.volume(), 1.0);
        config.set_subdivision_volume(-0.2);
        assert_eq!(config.subdivision_volume(), 0.0);
        config.set_volume(f32::NAN);
        assert_eq!(config.volume(), 0.0);
    }

    #[test]
    fn bpm_setter_holds_for_every_input() {
        let mut config = MetronomeConfig::default();
        for bpm in -1000..1000 {
            config.set_bpm(bpm);
            assert!((20..=300).contains(&config.bpm()));
        }
    }

    #[test]
    fn negative_latency_is_not_compensated() {
        let mut config = MetronomeConfig::default();
        config.set_latency_offset_ms(-40);
        assert_eq!(config.latency_offset_ms(), -40);
        assert_eq!(config.compensation_ms(), 0);
        config.set_latency_offset_ms(25);
        assert_eq!(config.compensation_ms(), 25);
    }

    #[test]
    fn phase_advances_and_wraps() {
        let mut phase = MetronomePhase::START;
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push((phase.beat, phase.subdivision));
            phase = phase.advanced(2, 3);
        }
        assert_eq!(
            seen,
            vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1), (0, 0)]
        );
    }

    #[test]
    fn phase_normalizes_after_config_change() {
        assert_eq!(
            MetronomePhase::new(1, 5).normalized(2, 4),
            MetronomePhase::new(2, 0)
        );
        assert_eq!(
            MetronomePhase::new(6, 0).normalized(1, 4),
            MetronomePhase::new(2, 0)
        );
        assert_eq!(
            MetronomePhase::new(3, 5).normalized(2, 4),
            MetronomePhase::new(0, 0)
        );
    }

    #[test]
    fn phase_bits_roundtrip() {
        let phase = MetronomePhase::new(11, 7);
        assert_eq!(MetronomePhase::from_bits(phase.to_bits()), phase);
    }
}

use std::path::Path;

use pulse_domain::{ClickEvent, ClickKind, ClickStyle};
use tracing::{debug, info};

use crate::dsp::{f32_to_i16, resample_linear, synthesize_click, CLICK_SAMPLE_RATE};
use crate::io::AudioDecoder;

/// Tone parameters of a synthesized click.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClickVoice {
    pub frequency_hz: f32,
    pub duration_ms: u32,
}

impl ClickVoice {
    pub const ACCENT_HZ: f32 = 1200.0;
    pub const MAIN_HZ: f32 = 1000.0;
    /// Scaled by the subdivision's pitch multiplier.
    pub const SUBDIVISION_HZ: f32 = 800.0;
    pub const MAIN_MS: u32 = 30;
    pub const SUBDIVISION_MS: u32 = 20;

    pub fn for_event(event: &ClickEvent) -> Self {
        match event.kind() {
            ClickKind::Accent => Self {
                frequency_hz: Self::ACCENT_HZ,
                duration_ms: Self::MAIN_MS,
            },
            ClickKind::Main => Self {
                frequency_hz: Self::MAIN_HZ,
                duration_ms: Self::MAIN_MS,
            },
            ClickKind::Subdivision => Self {
                frequency_hz: Self::SUBDIVISION_HZ * event.pitch_multiplier,
                duration_ms: Self::SUBDIVISION_MS,
            },
        }
    }

    pub fn synthesize(&self, volume: f32) -> Vec<i16> {
        synthesize_click(self.frequency_hz, self.duration_ms, volume)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickSource {
    Loaded,
    Synthesized,
}

/// 16-bit mono click at [`CLICK_SAMPLE_RATE`].
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedClick {
    pub samples: Vec<i16>,
    pub source: ClickSource,
}

/// Click samples for one style, decoded up front.
///
/// Any voice whose file is missing or unreadable is synthesized instead.
#[derive(Clone, Debug)]
pub struct ClickBank {
    style: ClickStyle,
    accent: Option<Vec<f32>>,
    main: Option<Vec<f32>>,
    subdivision: Option<Vec<f32>>,
}

impl ClickBank {
    pub fn synthesized(style: ClickStyle) -> Self {
        Self {
            style,
            accent: None,
            main: None,
            subdivision: None,
        }
    }

    pub fn load(dir: &Path, style: ClickStyle) -> Self {
        let bank = Self {
            style,
            accent: load_sample(&dir.join(style.accent_file())),
            main: load_sample(&dir.join(style.click_file())),
            subdivision: load_sample(&dir.join(style.subdivision_file())),
        };
        info!(
            style = style.display_name(),
            accent = bank.accent.is_some(),
            main = bank.main.is_some(),
            subdivision = bank.subdivision.is_some(),
            "click bank loaded"
        );
        bank
    }

    pub fn style(&self) -> ClickStyle {
        self.style
    }

    pub fn is_synthesized(&self) -> bool {
        self.accent.is_none() && self.main.is_none() && self.subdivision.is_none()
    }

    pub fn render(&self, event: &ClickEvent) -> RenderedClick {
        let gain = event.gain();
        let loaded = match event.kind() {
            ClickKind::Accent => self.accent.as_ref().or(self.main.as_ref()).map(|s| s.to_vec()),
            ClickKind::Main => self.main.as_ref().map(|s| s.to_vec()),
            ClickKind::Subdivision => self.subdivision.as_ref().map(|s| {
                let played_rate = (CLICK_SAMPLE_RATE as f32 * event.pitch_multiplier) as u32;
                resample_linear(s, played_rate, CLICK_SAMPLE_RATE)
            }),
        };
        match loaded {
            Some(samples) => RenderedClick {
                samples: f32_to_i16(&samples, gain),
                source: ClickSource::Loaded,
            },
            None => RenderedClick {
                samples: ClickVoice::for_event(event).synthesize(gain),
                source: ClickSource::Synthesized,
            },
        }
    }
}

fn load_sample(path: &Path) -> Option<Vec<f32>> {
    match AudioDecoder::open(path) {
        Ok(audio) if !audio.samples.is_empty() => Some(resample_linear(
            &audio.samples,
            audio.sample_rate,
            CLICK_SAMPLE_RATE,
        )),
        Ok(_) => {
            debug!(?path, "click sample is empty");
            None
        }
        Err(err) => {
            debug!(?path, %err, "click sample unavailable");
            None
        }
    }
}

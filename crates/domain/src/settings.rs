use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metronome::{ClickStyle, MetronomeConfig, Subdivision};
use crate::tempo::DEFAULT_BPM;
use crate::DomainError;

/// Persisted practice defaults.
///
/// Fields missing from a stored file fall back to their defaults so older
/// files keep loading.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PracticeSettings {
    pub latency_offset_ms: i64,
    pub click_style: ClickStyle,
    pub default_bpm: u32,
    pub default_subdivision: Subdivision,
    pub default_beats_per_measure: u32,
    pub accent_first_beat: bool,
    pub default_metronome_volume: f32,
    pub default_subdivision_volume: f32,
    /// Output rate requested from the audio device; the device default is
    /// used when it cannot run at this rate.
    pub audio_sample_rate: u32,
    pub countdown_seconds: u32,
}

impl Default for PracticeSettings {
    fn default() -> Self {
        Self {
            latency_offset_ms: 0,
            click_style: ClickStyle::Style1,
            default_bpm: DEFAULT_BPM,
            default_subdivision: Subdivision::Quarter,
            default_beats_per_measure: 4,
            accent_first_beat: true,
            default_metronome_volume: 0.8,
            default_subdivision_volume: 0.5,
            audio_sample_rate: 44_100,
            countdown_seconds: 4,
        }
    }
}

impl PracticeSettings {
    /// Builds a live configuration; every stored value passes through the
    /// config setters and is clamped there.
    pub fn metronome_config(&self) -> MetronomeConfig {
        let mut config = MetronomeConfig::default();
        config.set_bpm(i64::from(self.default_bpm));
        config.set_beats_per_measure(i64::from(self.default_beats_per_measure));
        config.set_subdivision(self.default_subdivision);
        config.set_click_style(self.click_style);
        config.set_accent_first_beat(self.accent_first_beat);
        config.set_volume(self.default_metronome_volume);
        config.set_subdivision_volume(self.default_subdivision_volume);
        config.set_latency_offset_ms(self.latency_offset_ms);
        config
    }

    /// Copies the live configuration back so it becomes the next default.
    pub fn remember(&mut self, config: &MetronomeConfig) {
        self.default_bpm = config.bpm();
        self.default_beats_per_measure = config.beats_per_measure();
        self.default_subdivision = config.subdivision();
        self.click_style = config.click_style();
        self.accent_first_beat = config.accent_first_beat();
        self.default_metronome_volume = config.volume();
        self.default_subdivision_volume = config.subdivision_volume();
        self.latency_offset_ms = config.latency_offset_ms();
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SettingsFormat {
    Json,
    Yaml,
}

impl SettingsFormat {
    /// `.yaml`/`.yml` select YAML, anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => SettingsFormat::Yaml,
            _ => SettingsFormat::Json,
        }
    }

    pub fn encode(self, settings: &PracticeSettings) -> Result<String, DomainError> {
        match self {
            SettingsFormat::Json => serde_json::to_string_pretty(settings)
                .map_err(|err| DomainError::serialization(err.to_string())),
            SettingsFormat::Yaml => serde_yaml::to_string(settings)
                .map_err(|err| DomainError::serialization(err.to_string())),
        }
    }

    pub fn decode(self, text: &str) -> Result<PracticeSettings, DomainError> {
        match self {
            SettingsFormat::Json => serde_json::from_str(text)
                .map_err(|err| DomainError::serialization(err.to_string())),
            SettingsFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|err| DomainError::serialization(err.to_string())),
        }
    }
}

pub trait SettingsStore {
    fn load(&self) -> Result<PracticeSettings, DomainError>;
    fn save(&self, settings: &PracticeSettings) -> Result<(), DomainError>;
}

pub struct FileSettingsStore {
    path: PathBuf,
    format: SettingsFormat,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = SettingsFormat::from_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    /// A missing file is a first run and yields defaults.
    fn load(&self) -> Result<PracticeSettings, DomainError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => self.format.decode(&text),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = ?self.path, "no settings file, using defaults");
                Ok(PracticeSettings::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, settings: &PracticeSettings) -> Result<(), DomainError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = self.format.encode(settings)?;
        fs::write(&self.path, text)?;
        debug!(path = ?self.path, "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().unwrap(), PracticeSettings::default());
    }

    #[test]
    fn saves_and_loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("nested").join("settings.yaml"));
        let mut settings = PracticeSettings::default();
        settings.default_bpm = 96;
        settings.default_subdivision = Subdivision::Swing;
        store.save(&settings).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("default_subdivision: SWING"));
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn click_style_keeps_underscored_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.yaml"));
        let settings = PracticeSettings {
            click_style: ClickStyle::Style2,
            ..Default::default()
        };
        store.save(&settings).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("click_style: STYLE_2"), "{text}");
        assert_eq!(store.load().unwrap().click_style, ClickStyle::Style2);

        let json = SettingsFormat::Json.encode(&PracticeSettings::default()).unwrap();
        assert!(json.contains("\"STYLE_1\""), "{json}");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings = SettingsFormat::Json
            .decode(r#"{ "default_bpm": 140, "click_style": "STYLE_2" }"#)
            .unwrap();
        assert_eq!(settings.default_bpm, 140);
        assert_eq!(settings.click_style, ClickStyle::Style2);
        assert_eq!(settings.default_beats_per_measure, 4);
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let err = SettingsFormat::Json.decode("{ nope").unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
    }

    #[test]
    fn config_roundtrip_clamps_stored_values() {
        let settings = PracticeSettings {
            default_bpm: 999,
            default_beats_per_measure: 0,
            default_metronome_volume: 2.0,
            ..Default::default()
        };
        let config = settings.metronome_config();
        assert_eq!(config.bpm(), 300);
        assert_eq!(config.beats_per_measure(), 1);
        assert_eq!(config.volume(), 1.0);

        let mut remembered = PracticeSettings::default();
        remembered.remember(&config);
        assert_eq!(remembered.default_bpm, 300);
        assert_eq!(remembered.default_beats_per_measure, 1);
    }
}

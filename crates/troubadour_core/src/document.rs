//! Persisted Mixer Documents
//!
//! The on-disk format is a TOML document with three sections:
//!
//! ```toml
//! [app]                    # engine-wide settings
//! preferred_rate = 48000
//! frames_per_block = 512
//!
//! [audio]                  # preferred devices and stream shape
//! sample_rate = 48000
//! channels = 2
//!
//! [[mixer.channels]]       # one entry per channel
//! id = "mic"
//! name = "Microphone"
//! volume_db = 0.0
//! bus_ids = ["main"]
//!
//! [[mixer.buses]]          # one entry per bus
//! id = "main"
//! name = "Main Out"
//! ```
//!
//! The same document shape is used for the main config file and for
//! presets (which carry only the `[mixer]` section that matters to
//! them). Any snapshot the engine can emit round-trips through this
//! format; legacy volumes outside [-60, +18] load by clamping.
//!
//! # Storage Locations
//! - Linux: `~/.config/troubadour/config.toml`
//! - Windows: `%APPDATA%\troubadour\config.toml`
//! - macOS: `~/Library/Application Support/troubadour/config.toml`

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{EngineConfig, SampleRate, StreamConfig};
use crate::error::{MixerError, MixerResult};
use crate::snapshot::MixerState;

/// Sample format of device streams. v1 is f32-interleaved only; the
/// field exists so documents stay forward-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    #[serde(rename = "f32")]
    F32,
}

/// `[app]` - engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub preferred_rate: u32,
    pub frames_per_block: u32,
    pub meter_decay_db_per_sec: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_directory: Option<PathBuf>,
    pub auto_save_interval_seconds: u32,
}

impl Default for AppSection {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            preferred_rate: config.sample_rate.as_hz(),
            frames_per_block: config.frames_per_block,
            meter_decay_db_per_sec: config.meter_decay_db_per_sec,
            preset_directory: None,
            auto_save_interval_seconds: config.auto_save_interval_seconds,
        }
    }
}

/// `[audio]` - preferred devices and stream shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub buffer_size: u32,
}

impl Default for AudioSection {
    fn default() -> Self {
        let config = StreamConfig::default();
        Self {
            input_device: None,
            output_device: None,
            sample_rate: config.sample_rate.as_hz(),
            channels: config.channels,
            format: SampleFormat::F32,
            buffer_size: config.buffer_size,
        }
    }
}

/// The whole persisted document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerDocument {
    pub app: AppSection,
    pub audio: AudioSection,
    pub mixer: MixerState,
}

impl MixerDocument {
    /// Parse a document, validating the graph it carries.
    pub fn parse(text: &str) -> MixerResult<Self> {
        let doc: MixerDocument = toml::from_str(text)
            .map_err(|e| MixerError::validation(format!("malformed mixer document: {e}")))?;
        doc.mixer.validate()?;
        doc.engine_config()?.validate()?;
        Ok(doc)
    }

    pub fn to_toml(&self) -> MixerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MixerError::Fatal(format!("serializing mixer document: {e}")))
    }

    /// Load from a path; a missing file yields the default document.
    pub fn load_or_default(path: &Path) -> MixerResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no config document, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|e| MixerError::device(format!("reading {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Save to a path, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> MixerResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MixerError::device(format!("creating {}: {e}", parent.display())))?;
        }
        fs::write(path, self.to_toml()?)
            .map_err(|e| MixerError::device(format!("writing {}: {e}", path.display())))?;
        info!(path = %path.display(), "mixer document saved");
        Ok(())
    }

    /// The engine configuration the `[app]` section describes.
    pub fn engine_config(&self) -> MixerResult<EngineConfig> {
        Ok(EngineConfig {
            sample_rate: SampleRate::try_from(self.app.preferred_rate)?,
            frames_per_block: self.app.frames_per_block,
            meter_decay_db_per_sec: self.app.meter_decay_db_per_sec,
            preset_directory: self.app.preset_directory.clone(),
            auto_save_interval_seconds: self.app.auto_save_interval_seconds,
        })
    }

    /// Build a document from the live engine configuration and state.
    pub fn from_parts(config: &EngineConfig, mixer: MixerState) -> Self {
        Self {
            app: AppSection {
                preferred_rate: config.sample_rate.as_hz(),
                frames_per_block: config.frames_per_block,
                meter_decay_db_per_sec: config.meter_decay_db_per_sec,
                preset_directory: config.preset_directory.clone(),
                auto_save_interval_seconds: config.auto_save_interval_seconds,
            },
            audio: AudioSection::default(),
            mixer,
        }
    }
}

/// Platform config file location.
pub fn default_config_path() -> MixerResult<PathBuf> {
    ProjectDirs::from("com", "troubadour", "troubadour")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or_else(|| MixerError::Fatal("could not determine config directory".into()))
}

/// Platform preset directory, next to the config file.
pub fn default_preset_dir() -> MixerResult<PathBuf> {
    ProjectDirs::from("com", "troubadour", "troubadour")
        .map(|dirs| dirs.config_dir().join("presets"))
        .ok_or_else(|| MixerError::Fatal("could not determine config directory".into()))
}

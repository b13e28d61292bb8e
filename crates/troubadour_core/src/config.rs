//! Engine and Stream Configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MixerError, MixerResult};
use troubadour_dsp::DEFAULT_PEAK_DECAY_DB_PER_SEC;

/// Sample rates the engine and its streams may run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
    Hz192000,
}

impl SampleRate {
    pub fn as_hz(self) -> u32 {
        match self {
            Self::Hz44100 => 44_100,
            Self::Hz48000 => 48_000,
            Self::Hz88200 => 88_200,
            Self::Hz96000 => 96_000,
            Self::Hz192000 => 192_000,
        }
    }

    pub const ALL: [SampleRate; 5] = [
        Self::Hz44100,
        Self::Hz48000,
        Self::Hz88200,
        Self::Hz96000,
        Self::Hz192000,
    ];
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = MixerError;

    fn try_from(hz: u32) -> MixerResult<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_hz() == hz)
            .ok_or_else(|| MixerError::validation(format!("unsupported sample rate: {hz}")))
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> u32 {
        rate.as_hz()
    }
}

/// Configuration of one hardware stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate
    pub sample_rate: SampleRate,

    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Frames per callback; power of two, 64..=4096
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::default(),
            channels: 2,
            buffer_size: 512,
        }
    }
}

impl StreamConfig {
    /// One callback's worth of latency for this configuration.
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate.as_hz() as f32) * 1000.0
    }

    pub fn validate(&self) -> MixerResult<()> {
        if self.channels == 0 || self.channels > 2 {
            return Err(MixerError::validation(format!(
                "channel count must be 1 or 2, got {}",
                self.channels
            )));
        }
        if !self.buffer_size.is_power_of_two()
            || self.buffer_size < 64
            || self.buffer_size > 4096
        {
            return Err(MixerError::validation(format!(
                "buffer size must be a power of two in 64..=4096, got {}",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The rate the mixer graph runs at; device streams are resampled
    /// to and from this rate.
    pub sample_rate: SampleRate,

    /// Frames per processing tick; power of two, 64..=4096
    pub frames_per_block: u32,

    /// Meter peak decay in dB per second
    pub meter_decay_db_per_sec: f32,

    /// Directory holding preset documents; `None` uses the platform
    /// default next to the config file.
    pub preset_directory: Option<PathBuf>,

    /// Seconds between automatic config saves; 0 disables
    pub auto_save_interval_seconds: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::default(),
            frames_per_block: 512,
            meter_decay_db_per_sec: DEFAULT_PEAK_DECAY_DB_PER_SEC,
            preset_directory: None,
            auto_save_interval_seconds: 30,
        }
    }
}

impl EngineConfig {
    /// The period of one processing tick.
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(
            self.frames_per_block as f64 / self.sample_rate.as_hz() as f64,
        )
    }

    /// Seconds covered by one block at the engine rate.
    pub fn block_secs(&self) -> f32 {
        self.frames_per_block as f32 / self.sample_rate.as_hz() as f32
    }

    pub fn validate(&self) -> MixerResult<()> {
        if !self.frames_per_block.is_power_of_two()
            || self.frames_per_block < 64
            || self.frames_per_block > 4096
        {
            return Err(MixerError::validation(format!(
                "frames per block must be a power of two in 64..=4096, got {}",
                self.frames_per_block
            )));
        }
        if !self.meter_decay_db_per_sec.is_finite() || self.meter_decay_db_per_sec < 0.0 {
            return Err(MixerError::validation(
                "meter decay must be a non-negative finite value",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::try_from(48_000).unwrap(), SampleRate::Hz48000);
        assert_eq!(SampleRate::Hz96000.as_hz(), 96_000);
        assert!(SampleRate::try_from(22_050).is_err());
    }

    #[test]
    fn test_default_stream_config_is_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate.as_hz(), 48_000);
        assert_eq!(config.buffer_size, 512);
    }

    #[test]
    fn test_stream_config_validation() {
        let mut config = StreamConfig::default();

        config.channels = 0;
        assert!(config.validate().is_err());
        config.channels = 6;
        assert!(config.validate().is_err());
        config.channels = 2;

        config.buffer_size = 100; // not a power of two
        assert!(config.validate().is_err());
        config.buffer_size = 32; // too small
        assert!(config.validate().is_err());
        config.buffer_size = 8192; // too large
        assert!(config.validate().is_err());
        config.buffer_size = 256;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency_calculation() {
        let config = StreamConfig {
            sample_rate: SampleRate::Hz48000,
            channels: 2,
            buffer_size: 512,
        };
        assert!((config.latency_ms() - 10.67).abs() < 0.01);
    }

    #[test]
    fn test_tick_period() {
        let config = EngineConfig {
            sample_rate: SampleRate::Hz96000,
            frames_per_block: 512,
            ..Default::default()
        };
        let period = config.tick_period();
        assert!((period.as_secs_f64() - 0.00533).abs() < 0.0001);
    }

    #[test]
    fn test_engine_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());

        let bad = EngineConfig {
            frames_per_block: 1000,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = EngineConfig {
            meter_decay_db_per_sec: f32::NAN,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_sample_rate_serde_as_number() {
        let json = serde_json::to_string(&SampleRate::Hz44100).unwrap();
        assert_eq!(json, "44100");

        let rate: SampleRate = serde_json::from_str("192000").unwrap();
        assert_eq!(rate, SampleRate::Hz192000);

        assert!(serde_json::from_str::<SampleRate>("12345").is_err());
    }
}

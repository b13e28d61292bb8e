//! Level Metering
//!
//! Computes the RMS level and a decaying held peak from sample blocks.
//! The RMS level is instantaneous (per block); the peak is held between
//! blocks and decays at a fixed dB-per-second rate so the UI shows a
//! brief "peak hold" after a transient.

use crate::db::Db;

/// Default peak decay rate, matching the mixer's display convention.
pub const DEFAULT_PEAK_DECAY_DB_PER_SEC: f32 = 12.0;

/// RMS + decaying-peak meter for one signal tap.
///
/// One meter is attached to every channel (post-gain, pre-sum) and every
/// bus (post-sum). Meters live on the engine thread; readers see their
/// values through snapshots.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    /// Peak decay in dB per second
    decay_db_per_sec: f32,
    /// Instantaneous RMS of the last block
    level: Db,
    /// Held peak, decayed between updates
    peak_db: f32,
}

impl LevelMeter {
    pub fn new(decay_db_per_sec: f32) -> Self {
        Self {
            decay_db_per_sec: decay_db_per_sec.max(0.0),
            level: Db::SILENCE,
            peak_db: Db::SILENCE.get(),
        }
    }

    /// Feed one block of samples and the wall-clock span it covers.
    ///
    /// Interleaving does not matter for RMS/peak, so the same meter works
    /// for mono and stereo taps.
    pub fn update(&mut self, block: &[f32], dt_secs: f32) {
        self.decay(dt_secs);

        if block.is_empty() {
            self.level = Db::SILENCE;
            return;
        }

        let mut sum_sq = 0.0f32;
        let mut block_peak = 0.0f32;
        for &x in block {
            sum_sq += x * x;
            block_peak = block_peak.max(x.abs());
        }

        let rms = (sum_sq / block.len() as f32).sqrt();
        self.level = Db::from_linear(rms);

        let block_peak_db = Db::from_linear(block_peak).get();
        if block_peak_db > self.peak_db {
            self.peak_db = block_peak_db;
        }
    }

    /// Advance the peak decay without new samples (silent channel).
    pub fn decay(&mut self, dt_secs: f32) {
        self.level = Db::SILENCE;
        self.peak_db = (self.peak_db - self.decay_db_per_sec * dt_secs.max(0.0))
            .max(Db::SILENCE.get());
    }

    /// Instantaneous RMS level of the last block.
    pub fn level(&self) -> Db {
        self.level
    }

    /// Held peak after decay.
    pub fn peak(&self) -> Db {
        Db::saturating(self.peak_db)
    }

    /// Zero both observables.
    pub fn reset(&mut self) {
        self.level = Db::SILENCE;
        self.peak_db = Db::SILENCE.get();
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_PEAK_DECAY_DB_PER_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_meter_is_silent() {
        let meter = LevelMeter::default();
        assert!(meter.level().is_silence());
        assert!(meter.peak().is_silence());
    }

    #[test]
    fn test_unity_block() {
        let mut meter = LevelMeter::default();
        meter.update(&[1.0; 512], 0.01);

        // RMS of all-ones is 1.0 => 0 dB
        assert!(meter.level().get().abs() < 0.01);
        assert!(meter.peak().get().abs() < 0.01);
    }

    #[test]
    fn test_half_amplitude_square() {
        let mut meter = LevelMeter::default();
        let block: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        meter.update(&block, 0.01);

        // RMS and peak of a +/-0.5 square are both 0.5 => ~-6.02 dB
        assert!((meter.level().get() + 6.02).abs() < 0.05);
        assert!((meter.peak().get() + 6.02).abs() < 0.05);
    }

    #[test]
    fn test_peak_holds_then_decays() {
        let mut meter = LevelMeter::new(12.0);
        meter.update(&[1.0; 64], 0.0);
        assert!(meter.peak().get().abs() < 0.01);

        // One second of silence decays the peak by 12 dB
        meter.decay(1.0);
        assert!((meter.peak().get() + 12.0).abs() < 0.01);

        // Another block below the held peak does not lift it
        meter.update(&[0.01; 64], 0.0);
        assert!(meter.peak().get() < -11.0);
    }

    #[test]
    fn test_decay_floors_at_silence() {
        let mut meter = LevelMeter::new(12.0);
        meter.update(&[0.5; 64], 0.0);
        meter.decay(1000.0);
        assert!(meter.peak().is_silence());
        assert!(meter.level().is_silence());
    }

    #[test]
    fn test_silent_update_reports_silence() {
        let mut meter = LevelMeter::default();
        meter.update(&[1.0; 64], 0.01);
        meter.update(&[0.0; 64], 0.01);

        assert!(meter.level().is_silence());
        // Peak is still held (only slightly decayed)
        assert!(meter.peak().get() > -1.0);
    }

    #[test]
    fn test_reset() {
        let mut meter = LevelMeter::default();
        meter.update(&[1.0; 64], 0.01);
        meter.reset();
        assert!(meter.level().is_silence());
        assert!(meter.peak().is_silence());
    }
}

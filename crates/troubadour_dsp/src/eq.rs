//! Three-Band Channel EQ
//!
//! A light tone control for individual mixer channels: low shelf at
//! 80 Hz, a peaking mid with configurable center frequency, high shelf
//! at 12 kHz. BiQuad filters from the RBJ Audio EQ Cookbook, one filter
//! instance per band per stereo side.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

use crate::effect::{Effect, ProcessContext};

/// Low shelf corner frequency (Hz)
pub const LOW_SHELF_HZ: f32 = 80.0;

/// High shelf corner frequency (Hz)
pub const HIGH_SHELF_HZ: f32 = 12_000.0;

/// Band gains are clamped to this range before coefficients are computed
const BAND_GAIN_RANGE_DB: f32 = 18.0;

/// Convert dB gain to linear amplitude
#[inline]
fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// A unity-gain biquad, used when a parameter combination has no valid
/// filter realization at the current sample rate.
fn identity_coefficients() -> Coefficients<f32> {
    Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    }
}

/// Compute band coefficients, clamping parameters into realizable ranges.
fn band_coefficients(band_type: Type<f32>, freq_hz: f32, sample_rate: f32) -> Coefficients<f32> {
    // Corner must sit below Nyquist with some margin
    let freq = freq_hz.clamp(20.0, sample_rate * 0.45);
    Coefficients::<f32>::from_params(band_type, sample_rate.hz(), freq.hz(), Q_BUTTERWORTH_F32)
        .unwrap_or_else(|_| identity_coefficients())
}

/// Per-channel three-band equalizer.
pub struct ThreeBandEq {
    // One filter per stereo side per band
    low: [DirectForm2Transposed<f32>; 2],
    mid: [DirectForm2Transposed<f32>; 2],
    high: [DirectForm2Transposed<f32>; 2],
}

impl ThreeBandEq {
    /// Gains are clamped to +/-18 dB; the mid center frequency is clamped
    /// below Nyquist. Construction never fails - degenerate parameter
    /// combinations degrade to a flat band.
    pub fn new(
        sample_rate: f32,
        low_gain_db: f32,
        mid_gain_db: f32,
        mid_freq_hz: f32,
        high_gain_db: f32,
    ) -> Self {
        let clamp = |g: f32| {
            if g.is_finite() {
                g.clamp(-BAND_GAIN_RANGE_DB, BAND_GAIN_RANGE_DB)
            } else {
                0.0
            }
        };

        let low = band_coefficients(
            Type::LowShelf(db_to_amplitude(clamp(low_gain_db))),
            LOW_SHELF_HZ,
            sample_rate,
        );
        let mid = band_coefficients(
            Type::PeakingEQ(db_to_amplitude(clamp(mid_gain_db))),
            mid_freq_hz,
            sample_rate,
        );
        let high = band_coefficients(
            Type::HighShelf(db_to_amplitude(clamp(high_gain_db))),
            HIGH_SHELF_HZ,
            sample_rate,
        );

        Self {
            low: [
                DirectForm2Transposed::<f32>::new(low),
                DirectForm2Transposed::<f32>::new(low),
            ],
            mid: [
                DirectForm2Transposed::<f32>::new(mid),
                DirectForm2Transposed::<f32>::new(mid),
            ],
            high: [
                DirectForm2Transposed::<f32>::new(high),
                DirectForm2Transposed::<f32>::new(high),
            ],
        }
    }

    /// Process one interleaved stereo buffer in place.
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_mut(2) {
            for (side, sample) in frame.iter_mut().enumerate() {
                let mut s = *sample;
                s = self.low[side].run(s);
                s = self.mid[side].run(s);
                s = self.high[side].run(s);
                *sample = s;
            }
        }
    }
}

impl Effect for ThreeBandEq {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        self.process_interleaved(buffer);
    }

    fn reset(&mut self) {
        for side in 0..2 {
            self.low[side].reset_state();
            self.mid[side].reset_state();
            self.high[side].reset_state();
        }
    }

    fn name(&self) -> &'static str {
        "Three-Band EQ"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin();
                [v, v]
            })
            .collect()
    }

    fn rms(buffer: &[f32]) -> f32 {
        (buffer.iter().map(|x| x * x).sum::<f32>() / buffer.len() as f32).sqrt()
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = ThreeBandEq::new(48000.0, 0.0, 0.0, 1000.0, 0.0);
        let input = sine(1000.0, 48000.0, 4096);
        let mut buffer = input.clone();
        eq.process_interleaved(&mut buffer);

        let in_rms = rms(&input);
        let out_rms = rms(&buffer);
        assert!(
            (out_rms / in_rms - 1.0).abs() < 0.01,
            "flat EQ changed level: {} -> {}",
            in_rms,
            out_rms
        );
    }

    #[test]
    fn test_low_shelf_boost_lifts_bass() {
        let mut eq = ThreeBandEq::new(48000.0, 6.0, 0.0, 1000.0, 0.0);
        let input = sine(40.0, 48000.0, 8192);
        let mut buffer = input.clone();
        eq.process_interleaved(&mut buffer);

        // ~6 dB boost is a factor of ~2 in amplitude; allow settling slack
        let gain = rms(&buffer) / rms(&input);
        assert!(gain > 1.6, "expected bass boost, gain was {}", gain);
    }

    #[test]
    fn test_high_shelf_cut_drops_treble() {
        let mut eq = ThreeBandEq::new(48000.0, 0.0, 0.0, 1000.0, -12.0);
        let input = sine(16000.0, 48000.0, 8192);
        let mut buffer = input.clone();
        eq.process_interleaved(&mut buffer);

        let gain = rms(&buffer) / rms(&input);
        assert!(gain < 0.5, "expected treble cut, gain was {}", gain);
    }

    #[test]
    fn test_mid_band_targets_center() {
        let mut eq = ThreeBandEq::new(48000.0, 0.0, -12.0, 1000.0, 0.0);

        let mid = sine(1000.0, 48000.0, 8192);
        let mut mid_out = mid.clone();
        eq.process_interleaved(&mut mid_out);
        let mid_gain = rms(&mid_out) / rms(&mid);

        let mut eq2 = ThreeBandEq::new(48000.0, 0.0, -12.0, 1000.0, 0.0);
        let far = sine(200.0, 48000.0, 8192);
        let mut far_out = far.clone();
        eq2.process_interleaved(&mut far_out);
        let far_gain = rms(&far_out) / rms(&far);

        assert!(mid_gain < 0.5, "center should be cut, gain {}", mid_gain);
        assert!(far_gain > 0.8, "distant band should be mostly flat, gain {}", far_gain);
    }

    #[test]
    fn test_degenerate_params_stay_finite() {
        // Center above Nyquist, non-finite gain: clamped, never panics
        let mut eq = ThreeBandEq::new(44100.0, f32::NAN, 0.0, 90_000.0, f32::INFINITY);
        let mut buffer = sine(440.0, 44100.0, 512);
        eq.process_interleaved(&mut buffer);
        for sample in &buffer {
            assert!(sample.is_finite());
        }
    }

    #[test]
    fn test_reset_clears_filter_state() {
        let mut eq = ThreeBandEq::new(48000.0, 6.0, 3.0, 500.0, -3.0);
        let input = sine(500.0, 48000.0, 1024);

        let mut first = input.clone();
        eq.process_interleaved(&mut first);

        eq.reset();
        let mut second = input.clone();
        eq.process_interleaved(&mut second);

        assert_eq!(first, second);
    }
}

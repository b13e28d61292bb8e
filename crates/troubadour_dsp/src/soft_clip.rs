//! Soft Clip Effect
//!
//! Gentle saturation above a threshold, in place of hard clipping at
//! 0 dBFS. Below the threshold the signal passes unchanged; above it
//! the overshoot is folded through the rational curve `u / (1 + u)`,
//! which has unit slope at the knee (so the transition is seamless) and
//! approaches the headroom ceiling asymptotically, so output magnitude
//! never reaches 1.0.

use crate::db::Db;
use crate::effect::{Effect, ProcessContext};

/// Rational saturator for one channel's effect chain.
pub struct SoftClip {
    /// Linear level where saturation begins
    threshold: f32,
    /// Distance from the threshold to full scale; the saturated region
    /// is compressed into this span
    headroom: f32,
}

impl SoftClip {
    /// `threshold_db` is clamped into the mixer's dB range and capped at
    /// unity; -3 dB is a sensible default (saturation starts around
    /// 0.71). At 0 dB and above there is no headroom left to saturate
    /// into, and the clipper degenerates to a hard clamp.
    pub fn new(threshold_db: f32) -> Self {
        let threshold = Db::saturating(threshold_db).to_linear().min(1.0);
        Self {
            threshold,
            headroom: 1.0 - threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    #[inline]
    fn clip(&self, sample: f32) -> f32 {
        let magnitude = sample.abs();
        if magnitude <= self.threshold {
            return sample;
        }
        if self.headroom <= 0.0 {
            // Threshold at full scale: nothing to saturate into
            return sample.clamp(-1.0, 1.0);
        }

        // Overshoot in headroom units; u/(1+u) keeps the knee slope at
        // one and the ceiling unreachable
        let overshoot = (magnitude - self.threshold) / self.headroom;
        let squashed = self.headroom * overshoot / (1.0 + overshoot);
        (self.threshold + squashed).copysign(sample)
    }
}

impl Default for SoftClip {
    fn default() -> Self {
        Self::new(-3.0)
    }
}

impl Effect for SoftClip {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        for sample in buffer.iter_mut() {
            *sample = self.clip(*sample);
        }
    }

    // Stateless
    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "Soft Clip"
    }
}

//! Per-Channel Effect Chain
//!
//! Channels carry an ordered list of effect configurations; the engine
//! instantiates a matching chain of DSP processors per channel. Configs
//! are plain serde values so they travel in snapshots and preset
//! documents; the processors themselves hold the filter state and never
//! leave the engine thread.

use serde::{Deserialize, Serialize};

use crate::eq::ThreeBandEq;
use crate::soft_clip::SoftClip;

/// Stream metadata handed to every effect invocation
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub channels: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: f32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// A single effect in a channel's chain.
///
/// # Real-time Safety Contract
///
/// `process` runs on the engine thread inside the tick budget:
/// - NO heap allocations
/// - NO syscalls, no locks
/// - O(n) in the buffer length
pub trait Effect: Send {
    /// Process an interleaved buffer in place
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext);

    /// Clear internal state (filter histories, envelopes)
    fn reset(&mut self);

    /// Name for logs and debugging
    fn name(&self) -> &'static str;
}

/// Serializable description of one effect instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EffectConfig {
    /// Three-band shelving/peaking EQ
    Eq {
        low_gain_db: f32,
        mid_gain_db: f32,
        mid_freq_hz: f32,
        high_gain_db: f32,
    },
    /// Soft saturation above a threshold
    SoftClip { threshold_db: f32 },
}

impl EffectConfig {
    /// Instantiate the DSP processor this config describes.
    pub fn build(&self, sample_rate: f32) -> Box<dyn Effect> {
        match *self {
            EffectConfig::Eq {
                low_gain_db,
                mid_gain_db,
                mid_freq_hz,
                high_gain_db,
            } => Box::new(ThreeBandEq::new(
                sample_rate,
                low_gain_db,
                mid_gain_db,
                mid_freq_hz,
                high_gain_db,
            )),
            EffectConfig::SoftClip { threshold_db } => Box::new(SoftClip::new(threshold_db)),
        }
    }
}

/// An ordered chain of effects applied to one channel's scratch buffer.
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
    context: ProcessContext,
}

impl EffectChain {
    /// Build a chain from channel configs. Allocates; never call on a
    /// processing tick - chains are rebuilt when a channel's config
    /// changes and swapped in between ticks.
    pub fn from_configs(configs: &[EffectConfig], sample_rate: f32) -> Self {
        Self {
            effects: configs.iter().map(|c| c.build(sample_rate)).collect(),
            context: ProcessContext::new(sample_rate, 2),
        }
    }

    pub fn empty(sample_rate: f32) -> Self {
        Self {
            effects: Vec::new(),
            context: ProcessContext::new(sample_rate, 2),
        }
    }

    /// Run every effect in order, in place.
    #[inline]
    pub fn process(&mut self, buffer: &mut [f32]) {
        for effect in &mut self.effects {
            effect.process(buffer, &self.context);
        }
    }

    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.effects.iter().map(|e| e.name()))
            .finish()
    }
}

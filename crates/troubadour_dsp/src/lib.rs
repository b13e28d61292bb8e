//! Troubadour DSP - Signal Processing Primitives
//!
//! Leaf crate of the mixer: the pieces that touch samples but know
//! nothing about devices or routing.
//!
//! - Decibel value type with the mixer's [-60, +18] convention
//! - RMS / decaying-peak level meter
//! - Linear resampler for reconciling device rates
//! - Per-channel effect chain (three-band EQ, soft clip)
//!
//! Everything here is allocation-free on the processing path once
//! constructed; chains and resamplers are built on the control side and
//! handed to the engine thread.

mod db;
mod effect;
mod eq;
mod error;
mod meter;
mod resample;
mod soft_clip;

pub use db::{Db, DB_MAX, DB_MIN};
pub use effect::{Effect, EffectChain, EffectConfig, ProcessContext};
pub use eq::{ThreeBandEq, HIGH_SHELF_HZ, LOW_SHELF_HZ};
pub use error::{DspError, DspResult};
pub use meter::{LevelMeter, DEFAULT_PEAK_DECAY_DB_PER_SEC};
pub use resample::LinearResampler;
pub use soft_clip::SoftClip;

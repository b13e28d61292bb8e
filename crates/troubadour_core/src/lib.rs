//! Troubadour Core - Virtual Audio Mixer Engine
//!
//! This crate provides the mixer's real-time engine:
//! - Lock-free SPSC rings between device callbacks and the engine
//! - The mixer graph: channels, buses, routing, gain/mute/solo
//! - Stream management over CPAL, with per-device resampling
//! - A synchronous control/query surface publishing versioned snapshots
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Control Thread                          │
//! │   Controller ──commands──▶ AudioEngine ◀──events── readers   │
//! └──────────────────────────────────────────────────────────────┘
//!                              │ crossbeam-channel
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Engine Thread                           │
//! │  capture rings ─▶ resample ─▶ MixerGraph ─▶ resample ─▶ out  │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲                                               │
//!   capture callbacks                            playback callbacks
//!   (OS realtime threads, ring writes only)      (ring reads only)
//! ```

mod config;
mod control;
mod device;
mod document;
mod engine;
mod error;
mod graph;
mod ids;
mod message;
mod presets;
mod ring;
mod snapshot;
mod stream;

pub use config::{EngineConfig, SampleRate, StreamConfig};
pub use control::{Controller, Request, Response, ResponseBody};
pub use device::{enumerate_all, enumerate_inputs, enumerate_outputs, AudioDeviceInfo, DeviceKind};
pub use document::{default_config_path, default_preset_dir, MixerDocument, SampleFormat};
pub use engine::AudioEngine;
pub use error::{ErrorKind, MixerError, MixerResult};
pub use graph::{Bus, Channel, EffectTable, MixerGraph};
pub use ids::{BusId, ChannelId, MASTER_ID, MAX_ID_LEN};
pub use message::Event;
pub use presets::{PresetStore, PresetWatcher, PRESET_EXT};
pub use ring::{sample_ring, RingConsumer, RingProducer};
pub use snapshot::{
    BusSnapshot, BusState, ChannelSnapshot, ChannelState, EngineSnapshot, MixerState, XrunCounts,
};
pub use stream::{CaptureBinding, PlaybackBinding, StreamManager, StreamState};

// Re-export DSP types the control surface exposes
pub use troubadour_dsp::{Db, EffectConfig, DB_MAX, DB_MIN};

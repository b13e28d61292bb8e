//! Stream Management
//!
//! Owns the cpal streams bound to channels and buses. Each binding pairs
//! an OS-owned realtime callback with an engine-side staging path:
//!
//! ```text
//! Capture:  device callback --ring--> engine tick --resample--> graph input
//! Playback: graph output --resample--> engine tick --ring--> device callback
//! ```
//!
//! Callbacks only touch their ring and a failure flag - no allocation,
//! no locks, no logging. Devices run at their native rate; the engine
//! side resamples to and from the engine rate.
//!
//! Per stream the lifecycle is Unassigned -> Opening -> Running ->
//! (Closing | Failed) -> Unassigned. A failed stream releases the device
//! and clears the assignment so the control plane can retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate as CpalSampleRate, StreamConfig as CpalStreamConfig};
use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::device;
use crate::error::{MixerError, MixerResult};
use crate::graph::MixerGraph;
use crate::ids::{BusId, ChannelId};
use crate::message::Event;
use crate::ring::{sample_ring, RingConsumer, RingProducer};
use crate::snapshot::XrunCounts;
use troubadour_dsp::LinearResampler;

/// Lifecycle of one device binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unassigned,
    Opening,
    Running,
    Closing,
    Failed,
}

/// Counters shared between a realtime callback and the engine side.
#[derive(Clone, Default)]
struct SharedFlags {
    /// Producer hit a full ring (samples dropped)
    overruns: Arc<AtomicU64>,
    /// Consumer hit an empty ring (silence substituted)
    underruns: Arc<AtomicU64>,
    /// The OS reported a stream error; engine tears the binding down
    failed: Arc<AtomicBool>,
}

/// Size the transfer ring to hold at least four engine blocks worth of
/// device-rate samples, so one missed tick never drops audio.
fn ring_capacity(engine_frames: usize, engine_rate: u32, device_rate: u32) -> usize {
    let device_frames = engine_frames * device_rate as usize / engine_rate as usize + 1;
    (device_frames * 2 * 4).next_power_of_two()
}

fn open_config(device_rate: u32, device_channels: u16, frames: u32) -> CpalStreamConfig {
    CpalStreamConfig {
        channels: device_channels.min(2),
        sample_rate: CpalSampleRate(device_rate),
        buffer_size: BufferSize::Fixed(frames),
    }
}

/// A channel's capture stream plus the engine-side drain path.
pub struct CaptureBinding {
    pub device_id: String,
    pub device_rate: u32,
    pub state: StreamState,
    // Held to keep the callback alive; never touched afterwards
    _stream: cpal::Stream,
    consumer: RingConsumer,
    resampler: LinearResampler,
    /// Raw device-rate samples read from the ring this tick
    staging: Vec<f32>,
    /// Engine-rate samples waiting to be handed to the graph
    pending: Vec<f32>,
    flags: SharedFlags,
}

impl CaptureBinding {
    /// Open the device at its native rate and start capturing into a
    /// fresh ring.
    pub fn open(device_id: &str, engine_rate: u32, engine_frames: usize) -> MixerResult<Self> {
        let cpal_device = device::find_input(device_id)?;
        let default = cpal_device
            .default_input_config()
            .map_err(|e| MixerError::device(format!("querying '{device_id}': {e}")))?;
        let device_rate = default.sample_rate().0;
        let device_channels = default.channels();

        let capacity = ring_capacity(engine_frames, engine_rate, device_rate);
        let (producer, consumer) = sample_ring(capacity);
        let flags = SharedFlags::default();

        let config = open_config(device_rate, device_channels, engine_frames as u32);
        let stream = build_capture_stream(&cpal_device, &config, producer, flags.clone())?;
        stream
            .play()
            .map_err(|e| MixerError::device(format!("starting capture on '{device_id}': {e}")))?;

        info!(device = device_id, rate = device_rate, "capture stream running");

        let resampler = LinearResampler::new(device_rate, engine_rate);
        let staging_cap = engine_frames * device_rate as usize / engine_rate as usize * 2 + 8;
        let pending_cap = resampler.max_output_frames(staging_cap / 2) * 2 + engine_frames * 2;

        Ok(Self {
            device_id: device_id.to_string(),
            device_rate,
            state: StreamState::Running,
            _stream: stream,
            consumer,
            resampler,
            staging: Vec::with_capacity(staging_cap),
            pending: Vec::with_capacity(pending_cap),
            flags,
        })
    }

    /// Drain the ring, resample to the engine rate, and fill exactly one
    /// engine block. Shortfalls become silence.
    pub fn fill_input(&mut self, out: &mut [f32], engine_rate: u32) {
        // Read up to one engine block's worth of device frames (plus one
        // for interpolation headroom)
        let frames = out.len() / 2;
        let device_frames = frames * self.device_rate as usize / engine_rate as usize + 1;
        self.staging.resize(device_frames * 2, 0.0);
        let read = self.consumer.read(&mut self.staging);
        // Writes and reads are always whole frames, so parity holds
        debug_assert!(read % 2 == 0);

        self.resampler
            .process(&self.staging[..read], &mut self.pending);

        let take = out.len().min(self.pending.len());
        out[..take].copy_from_slice(&self.pending[..take]);
        out[take..].fill(0.0);
        self.pending.drain(..take);

        // Never let jitter accumulate unbounded latency: if the pending
        // backlog exceeds two blocks, drop the oldest samples.
        let cap = out.len() * 2;
        if self.pending.len() > cap {
            let excess = self.pending.len() - cap;
            self.pending.drain(..excess);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.flags.failed.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.flags.overruns.load(Ordering::Relaxed)
    }
}

/// A bus's playback stream plus the engine-side feed path.
pub struct PlaybackBinding {
    pub device_id: String,
    pub device_rate: u32,
    pub state: StreamState,
    _stream: cpal::Stream,
    producer: RingProducer,
    resampler: LinearResampler,
    staging: Vec<f32>,
    flags: SharedFlags,
}

impl PlaybackBinding {
    pub fn open(device_id: &str, engine_rate: u32, engine_frames: usize) -> MixerResult<Self> {
        let cpal_device = device::find_output(device_id)?;
        let default = cpal_device
            .default_output_config()
            .map_err(|e| MixerError::device(format!("querying '{device_id}': {e}")))?;
        let device_rate = default.sample_rate().0;
        let device_channels = default.channels();

        let capacity = ring_capacity(engine_frames, engine_rate, device_rate);
        let (producer, consumer) = sample_ring(capacity);
        let flags = SharedFlags::default();

        let config = open_config(device_rate, device_channels, engine_frames as u32);
        let stream = build_playback_stream(&cpal_device, &config, consumer, flags.clone())?;
        stream
            .play()
            .map_err(|e| MixerError::device(format!("starting playback on '{device_id}': {e}")))?;

        info!(device = device_id, rate = device_rate, "playback stream running");

        let resampler = LinearResampler::new(engine_rate, device_rate);
        let staging_cap = resampler.max_output_frames(engine_frames) * 2;

        Ok(Self {
            device_id: device_id.to_string(),
            device_rate,
            state: StreamState::Running,
            _stream: stream,
            producer,
            resampler,
            staging: Vec::with_capacity(staging_cap),
            flags,
        })
    }

    /// Resample one engine block to the device rate, clamp to [-1, 1],
    /// and enqueue it. A full ring drops the excess and counts an
    /// overrun; the callback keeps draining regardless.
    pub fn push_output(&mut self, block: &[f32]) {
        self.staging.clear();
        self.resampler.process(block, &mut self.staging);
        for sample in self.staging.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        let written = self.producer.write(&self.staging);
        if written < self.staging.len() {
            self.flags.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.flags.failed.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.flags.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.flags.overruns.load(Ordering::Relaxed)
    }
}

fn build_capture_stream(
    cpal_device: &cpal::Device,
    config: &CpalStreamConfig,
    mut producer: RingProducer,
    flags: SharedFlags,
) -> MixerResult<cpal::Stream> {
    let channels = config.channels as usize;
    let err_flag = Arc::clone(&flags.failed);

    let stream = cpal_device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Realtime callback - no allocation, no locks, no logging
                let written = if channels == 2 {
                    producer.write(data)
                } else {
                    // Mono device: duplicate into stereo through a stack
                    // buffer, in bounded chunks
                    let mut buf = [0.0f32; 512];
                    let mut written = 0usize;
                    for chunk in data.chunks(256) {
                        for (i, &sample) in chunk.iter().enumerate() {
                            buf[2 * i] = sample;
                            buf[2 * i + 1] = sample;
                        }
                        written += producer.write(&buf[..chunk.len() * 2]);
                    }
                    written / 2
                };
                if written < data.len() {
                    flags.overruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                // Error path, not the hot path
                warn!("capture stream error: {err}");
                err_flag.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| MixerError::device(format!("building capture stream: {e}")))?;

    Ok(stream)
}

fn build_playback_stream(
    cpal_device: &cpal::Device,
    config: &CpalStreamConfig,
    mut consumer: RingConsumer,
    flags: SharedFlags,
) -> MixerResult<cpal::Stream> {
    let channels = config.channels as usize;
    let err_flag = Arc::clone(&flags.failed);

    let stream = cpal_device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Realtime callback - no allocation, no locks, no logging
                if channels == 2 {
                    let read = consumer.read_or_silence(data);
                    if read < data.len() {
                        flags.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    // Mono device: average stereo pairs through a stack
                    // buffer, in bounded chunks
                    let mut buf = [0.0f32; 512];
                    let mut short = false;
                    for chunk in data.chunks_mut(256) {
                        let want = chunk.len() * 2;
                        let read = consumer.read_or_silence(&mut buf[..want]);
                        short |= read < want;
                        for (i, sample) in chunk.iter_mut().enumerate() {
                            *sample = (buf[2 * i] + buf[2 * i + 1]) * 0.5;
                        }
                    }
                    if short {
                        flags.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                warn!("playback stream error: {err}");
                err_flag.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| MixerError::device(format!("building playback stream: {e}")))?;

    Ok(stream)
}

/// Owns every device binding. Lives on the engine thread; the SPSC
/// invariant holds because this is the sole engine-side reader of input
/// rings and writer of output rings.
pub struct StreamManager {
    engine_rate: u32,
    engine_frames: usize,
    captures: HashMap<ChannelId, CaptureBinding>,
    playbacks: HashMap<BusId, PlaybackBinding>,
}

impl StreamManager {
    pub fn new(engine_rate: u32, engine_frames: usize) -> Self {
        Self {
            engine_rate,
            engine_frames,
            captures: HashMap::new(),
            playbacks: HashMap::new(),
        }
    }

    /// Bring bindings in line with the graph's device assignments: close
    /// bindings whose entity or device went away, open bindings for new
    /// assignments. Open failures clear the assignment, flag the entity,
    /// and surface a device-error event.
    pub fn reconcile(&mut self, graph: &mut MixerGraph, events: &Sender<Event>) {
        // Drop stale captures
        let mut stale: Vec<ChannelId> = Vec::new();
        for (id, binding) in &mut self.captures {
            let wanted = graph
                .channel(id)
                .and_then(|c| c.input_device.as_deref())
                .map(|d| d == binding.device_id)
                .unwrap_or(false);
            if !wanted {
                binding.state = StreamState::Closing;
                stale.push(id.clone());
            }
        }
        for id in stale {
            info!(channel = %id, "closing capture stream");
            self.captures.remove(&id);
        }

        // Drop stale playbacks
        let mut stale: Vec<BusId> = Vec::new();
        for (id, binding) in &mut self.playbacks {
            let wanted = graph
                .bus(id)
                .and_then(|b| b.output_device.as_deref())
                .map(|d| d == binding.device_id)
                .unwrap_or(false);
            if !wanted {
                binding.state = StreamState::Closing;
                stale.push(id.clone());
            }
        }
        for id in stale {
            info!(bus = %id, "closing playback stream");
            self.playbacks.remove(&id);
        }

        // Open missing captures
        let wanted: Vec<(ChannelId, String)> = graph
            .channels()
            .filter(|c| !c.is_master)
            .filter_map(|c| c.input_device.clone().map(|d| (c.id.clone(), d)))
            .collect();
        for (id, device_id) in wanted {
            if self.captures.contains_key(&id) {
                continue;
            }
            match CaptureBinding::open(&device_id, self.engine_rate, self.engine_frames) {
                Ok(binding) => {
                    self.captures.insert(id, binding);
                }
                Err(err) => {
                    warn!(channel = %id, device = %device_id, %err, "failed to open capture stream");
                    let _ = graph.fail_channel_device(&id);
                    let _ = events.send(Event::device_error(
                        format!("channel:{id}"),
                        device_id,
                        err,
                    ));
                }
            }
        }

        // Open missing playbacks
        let wanted: Vec<(BusId, String)> = graph
            .buses()
            .filter_map(|b| b.output_device.clone().map(|d| (b.id.clone(), d)))
            .collect();
        for (id, device_id) in wanted {
            if self.playbacks.contains_key(&id) {
                continue;
            }
            match PlaybackBinding::open(&device_id, self.engine_rate, self.engine_frames) {
                Ok(binding) => {
                    self.playbacks.insert(id, binding);
                }
                Err(err) => {
                    warn!(bus = %id, device = %device_id, %err, "failed to open playback stream");
                    let _ = graph.fail_bus_device(&id);
                    let _ = events.send(Event::device_error(format!("bus:{id}"), device_id, err));
                }
            }
        }
    }

    /// Tear down bindings whose callbacks reported a stream error.
    pub fn reap_failures(&mut self, graph: &mut MixerGraph, events: &Sender<Event>) {
        let failed: Vec<ChannelId> = self
            .captures
            .iter()
            .filter(|(_, b)| b.has_failed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in failed {
            if let Some(mut binding) = self.captures.remove(&id) {
                binding.state = StreamState::Failed;
                warn!(channel = %id, device = %binding.device_id, "capture stream failed");
                let _ = graph.fail_channel_device(&id);
                let _ = events.send(Event::device_error(
                    format!("channel:{id}"),
                    binding.device_id.clone(),
                    "stream failed",
                ));
            }
        }

        let failed: Vec<BusId> = self
            .playbacks
            .iter()
            .filter(|(_, b)| b.has_failed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in failed {
            if let Some(mut binding) = self.playbacks.remove(&id) {
                binding.state = StreamState::Failed;
                warn!(bus = %id, device = %binding.device_id, "playback stream failed");
                let _ = graph.fail_bus_device(&id);
                let _ = events.send(Event::device_error(
                    format!("bus:{id}"),
                    binding.device_id.clone(),
                    "stream failed",
                ));
            }
        }
    }

    pub fn capture_mut(&mut self, id: &ChannelId) -> Option<&mut CaptureBinding> {
        self.captures.get_mut(id)
    }

    pub fn playback_mut(&mut self, id: &BusId) -> Option<&mut PlaybackBinding> {
        self.playbacks.get_mut(id)
    }

    pub fn capture_ids(&self) -> Vec<ChannelId> {
        self.captures.keys().cloned().collect()
    }

    pub fn playback_ids(&self) -> Vec<BusId> {
        self.playbacks.keys().cloned().collect()
    }

    /// Transport health per bound device, for snapshots.
    pub fn xruns(&self) -> Vec<XrunCounts> {
        let mut out: Vec<XrunCounts> = Vec::new();
        for binding in self.captures.values() {
            out.push(XrunCounts {
                device: binding.device_id.clone(),
                overruns: binding.overruns(),
                underruns: 0,
            });
        }
        for binding in self.playbacks.values() {
            out.push(XrunCounts {
                device: binding.device_id.clone(),
                overruns: binding.overruns(),
                underruns: binding.underruns(),
            });
        }
        out.sort_by(|a, b| a.device.cmp(&b.device));
        out
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        // Playback streams stop first so they never read from rings whose
        // producers are gone; capture streams follow; device handles are
        // released with the bindings.
        self.playbacks.clear();
        self.captures.clear();
    }
}

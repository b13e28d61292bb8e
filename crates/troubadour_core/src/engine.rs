//! Audio Engine
//!
//! The engine owns one processing thread that ticks at a fixed period
//! (`frames_per_block / sample_rate`). On each tick it drains every
//! capture ring through a resampler, runs the mixer graph, and feeds
//! every playback ring. Between ticks it drains the command queue, so
//! every control-plane mutation is a single atomic step with a stamped
//! snapshot version.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Control Thread                          │
//! │   AudioEngine handle ──commands──▶ ◀──events── readers      │
//! └─────────────────────────────────────────────────────────────┘
//!                        │ crossbeam-channel (sync replies)
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Engine Thread                           │
//! │  capture rings ──resample──▶ MixerGraph ──resample──▶ out   │
//! │  (device callbacks on OS realtime threads at either end)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine thread is the sole consumer of capture rings and sole
//! producer of playback rings; the SPSC invariant holds by construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::device;
use crate::error::{MixerError, MixerResult};
use crate::graph::{EffectTable, MixerGraph};
use crate::ids::{BusId, ChannelId};
use crate::message::{Command, Event};
use crate::snapshot::{EngineSnapshot, MixerState};
use crate::stream::StreamManager;
use troubadour_dsp::Db;

/// Handle to a running engine. Lives on the control side; all methods
/// are synchronous - they return once the engine thread has applied the
/// mutation and stamped the resulting snapshot version.
pub struct AudioEngine {
    command_sender: Sender<Command>,
    event_sender: Sender<Event>,
    event_receiver: Receiver<Event>,
    engine_thread: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
    config: EngineConfig,
}

impl AudioEngine {
    /// Validate the configuration and spawn the engine thread.
    pub fn start(config: EngineConfig) -> MixerResult<Self> {
        config.validate()?;

        let (command_sender, command_receiver) = bounded::<Command>(64);
        let (event_sender, event_receiver) = unbounded::<Event>();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let thread_config = config.clone();
        let thread_events = event_sender.clone();
        let thread_shutdown = Arc::clone(&shutdown_flag);

        let engine_thread = thread::Builder::new()
            .name("troubadour-engine".into())
            .spawn(move || {
                engine_thread_main(thread_config, command_receiver, thread_events, thread_shutdown);
            })
            .map_err(|e| MixerError::Fatal(format!("spawning engine thread: {e}")))?;

        Ok(Self {
            command_sender,
            event_sender,
            event_receiver,
            engine_thread: Some(engine_thread),
            shutdown_flag,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receiver for engine events (device errors, lifecycle).
    pub fn events(&self) -> Receiver<Event> {
        self.event_receiver.clone()
    }

    /// Sender other components (the preset watcher) use to publish into
    /// the same event stream.
    pub fn event_hook(&self) -> Sender<Event> {
        self.event_sender.clone()
    }

    // ---- command surface --------------------------------------------

    pub fn add_channel(&self, id: ChannelId, name: String) -> MixerResult<u64> {
        self.call(|reply| Command::AddChannel { id, name, reply })
    }

    pub fn remove_channel(&self, id: ChannelId) -> MixerResult<u64> {
        self.call(|reply| Command::RemoveChannel { id, reply })
    }

    pub fn set_channel_name(&self, id: ChannelId, name: String) -> MixerResult<u64> {
        self.call(|reply| Command::SetChannelName { id, name, reply })
    }

    pub fn set_channel_input_device(
        &self,
        id: ChannelId,
        device: Option<String>,
    ) -> MixerResult<u64> {
        self.call(|reply| Command::SetChannelInputDevice { id, device, reply })
    }

    pub fn set_channel_buses(
        &self,
        id: ChannelId,
        buses: std::collections::BTreeSet<BusId>,
    ) -> MixerResult<u64> {
        self.call(|reply| Command::SetChannelBuses { id, buses, reply })
    }

    pub fn set_volume(&self, id: ChannelId, gain: Db) -> MixerResult<u64> {
        self.call(|reply| Command::SetChannelGain { id, gain, reply })
    }

    pub fn toggle_mute(&self, id: ChannelId) -> MixerResult<(u64, bool)> {
        self.call(|reply| Command::ToggleMute { id, reply })
    }

    pub fn toggle_solo(&self, id: ChannelId) -> MixerResult<(u64, bool)> {
        self.call(|reply| Command::ToggleSolo { id, reply })
    }

    pub fn add_bus(&self, id: BusId, name: String) -> MixerResult<u64> {
        self.call(|reply| Command::AddBus { id, name, reply })
    }

    pub fn remove_bus(&self, id: BusId) -> MixerResult<u64> {
        self.call(|reply| Command::RemoveBus { id, reply })
    }

    pub fn set_bus_output_device(&self, id: BusId, device: Option<String>) -> MixerResult<u64> {
        self.call(|reply| Command::SetBusOutputDevice { id, device, reply })
    }

    pub fn set_bus_volume(&self, id: BusId, gain: Db) -> MixerResult<u64> {
        self.call(|reply| Command::SetBusGain { id, gain, reply })
    }

    pub fn toggle_bus_mute(&self, id: BusId) -> MixerResult<(u64, bool)> {
        self.call(|reply| Command::ToggleBusMute { id, reply })
    }

    /// Replace the entire graph atomically, reconciling streams.
    pub fn load_state(&self, state: MixerState) -> MixerResult<u64> {
        self.call(|reply| Command::LoadState { state, reply })
    }

    /// Publish the current state as an immutable, versioned snapshot.
    pub fn snapshot(&self) -> MixerResult<EngineSnapshot> {
        let (reply, rx) = bounded(1);
        self.command_sender
            .send(Command::GetSnapshot { reply })
            .map_err(|_| engine_gone())?;
        rx.recv().map_err(|_| engine_gone())
    }

    fn call<T>(&self, build: impl FnOnce(Sender<MixerResult<T>>) -> Command) -> MixerResult<T> {
        let (reply, rx) = bounded(1);
        self.command_sender
            .send(build(reply))
            .map_err(|_| engine_gone())?;
        rx.recv().map_err(|_| engine_gone())?
    }
}

fn engine_gone() -> MixerError {
    MixerError::Fatal("engine thread is not running".into())
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let _ = self.command_sender.send(Command::Shutdown);
        if let Some(handle) = self.engine_thread.take() {
            let _ = handle.join();
        }
    }
}

// ---- engine thread --------------------------------------------------

struct EngineState {
    graph: MixerGraph,
    effects: EffectTable,
    streams: StreamManager,
    /// Per-channel staging buffers at the engine rate, reused each tick
    input_buffers: HashMap<ChannelId, Vec<f32>>,
    block_len: usize,
    engine_rate: u32,
    events: Sender<Event>,
}

fn engine_thread_main(
    config: EngineConfig,
    command_receiver: Receiver<Command>,
    events: Sender<Event>,
    shutdown_flag: Arc<AtomicBool>,
) {
    let engine_rate = config.sample_rate.as_hz();
    let frames = config.frames_per_block as usize;
    info!(
        rate = engine_rate,
        frames,
        period_us = config.tick_period().as_micros() as u64,
        "engine thread started"
    );

    let mut state = EngineState {
        graph: MixerGraph::new(engine_rate, frames, config.meter_decay_db_per_sec),
        effects: EffectTable::new(engine_rate as f32),
        streams: StreamManager::new(engine_rate, frames),
        input_buffers: HashMap::new(),
        block_len: frames * 2,
        engine_rate,
        events: events.clone(),
    };

    let _ = events.send(Event::Started);

    let tick = config.tick_period();
    let mut next_tick = Instant::now() + tick;

    while !shutdown_flag.load(Ordering::SeqCst) {
        let timeout = next_tick.saturating_duration_since(Instant::now());
        match command_receiver.recv_timeout(timeout) {
            Ok(Command::Shutdown) => {
                info!("shutdown command received");
                break;
            }
            Ok(command) => {
                apply_command(command, &mut state);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                run_tick(&mut state);
                next_tick += tick;
                let now = Instant::now();
                if next_tick < now {
                    // Fell behind (debugger, suspend); skip the missed
                    // ticks instead of bursting to catch up
                    next_tick = now + tick;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                warn!("command channel disconnected");
                break;
            }
        }
    }

    // Playback streams close before capture streams (StreamManager drop
    // order), then the tables go away
    drop(state);
    let _ = events.send(Event::Stopped);
    info!("engine thread shutting down");
}

/// Apply one control command between ticks. Every mutation is atomic:
/// it either fully applies and stamps a new version, or leaves the graph
/// untouched and replies with a typed error.
fn apply_command(command: Command, state: &mut EngineState) {
    match command {
        Command::AddChannel { id, name, reply } => {
            let result = state.graph.add_channel(id, name);
            finish_mutation(state, result.is_ok());
            let _ = reply.send(result);
        }
        Command::RemoveChannel { id, reply } => {
            let result = state.graph.remove_channel(&id);
            finish_mutation(state, result.is_ok());
            let _ = reply.send(result);
        }
        Command::SetChannelName { id, name, reply } => {
            let _ = reply.send(state.graph.set_channel_name(&id, name));
        }
        Command::SetChannelInputDevice { id, device, reply } => {
            // "Device unknown" is synchronous; open failures surface
            // asynchronously as device-error events
            let result = match device {
                Some(device_id) => device::find_input(&device_id)
                    .map(|_| device_id)
                    .and_then(|d| state.graph.set_channel_input_device(&id, Some(d))),
                None => state.graph.set_channel_input_device(&id, None),
            };
            finish_mutation(state, result.is_ok());
            let _ = reply.send(result);
        }
        Command::SetChannelBuses { id, buses, reply } => {
            let _ = reply.send(state.graph.set_channel_buses(&id, buses));
        }
        Command::SetChannelGain { id, gain, reply } => {
            let _ = reply.send(state.graph.set_channel_gain(&id, gain));
        }
        Command::ToggleMute { id, reply } => {
            let _ = reply.send(state.graph.toggle_mute(&id));
        }
        Command::ToggleSolo { id, reply } => {
            let _ = reply.send(state.graph.toggle_solo(&id));
        }
        Command::AddBus { id, name, reply } => {
            let _ = reply.send(state.graph.add_bus(id, name));
        }
        Command::RemoveBus { id, reply } => {
            let result = state.graph.remove_bus(&id);
            finish_mutation(state, result.is_ok());
            let _ = reply.send(result);
        }
        Command::SetBusOutputDevice { id, device, reply } => {
            let result = match device {
                Some(device_id) => device::find_output(&device_id)
                    .map(|_| device_id)
                    .and_then(|d| state.graph.set_bus_output_device(&id, Some(d))),
                None => state.graph.set_bus_output_device(&id, None),
            };
            finish_mutation(state, result.is_ok());
            let _ = reply.send(result);
        }
        Command::SetBusGain { id, gain, reply } => {
            let _ = reply.send(state.graph.set_bus_gain(&id, gain));
        }
        Command::ToggleBusMute { id, reply } => {
            let _ = reply.send(state.graph.toggle_bus_mute(&id));
        }
        Command::LoadState { state: mixer_state, reply } => {
            let result = state.graph.load_state(mixer_state);
            finish_mutation(state, result.is_ok());
            let _ = reply.send(result);
        }
        Command::GetSnapshot { reply } => {
            let mut snapshot = state.graph.snapshot();
            snapshot.xruns = state.streams.xruns();
            let _ = reply.send(snapshot);
        }
        Command::Shutdown => unreachable!("handled by the engine loop"),
    }
}

/// Topology-affecting mutations rebuild the effect table and re-bind
/// streams; both are no-ops when nothing relevant changed.
fn finish_mutation(state: &mut EngineState, mutated: bool) {
    if !mutated {
        return;
    }
    state.effects.sync(&state.graph);
    state.streams.reconcile(&mut state.graph, &state.events);
}

/// One processing tick: drain inputs, mix, feed outputs.
fn run_tick(state: &mut EngineState) {
    state.streams.reap_failures(&mut state.graph, &state.events);

    // Stage every bound channel's input block at the engine rate
    let capture_ids = state.streams.capture_ids();
    state
        .input_buffers
        .retain(|id, _| capture_ids.contains(id));
    for id in &capture_ids {
        let buffer = state
            .input_buffers
            .entry(id.clone())
            .or_insert_with(|| vec![0.0; state.block_len]);
        buffer.resize(state.block_len, 0.0);
        if let Some(binding) = state.streams.capture_mut(id) {
            binding.fill_input(buffer, state.engine_rate);
        }
    }

    let inputs: HashMap<ChannelId, &[f32]> = state
        .input_buffers
        .iter()
        .map(|(id, buffer)| (id.clone(), buffer.as_slice()))
        .collect();

    state.graph.process(&inputs, &mut state.effects);

    // Deliver each bus with a bound device; clamping to [-1, 1] happens
    // at this device-write stage, inside push_output
    for id in state.streams.playback_ids() {
        match (state.graph.bus_output(&id), state.streams.playback_mut(&id)) {
            (Some(block), Some(binding)) => binding.push_output(block),
            _ => debug!(bus = %id, "playback bound to a bus with no output buffer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleRate;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn engine() -> AudioEngine {
        AudioEngine::start(EngineConfig::default()).unwrap()
    }

    fn ch(id: &str) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    fn bus(id: &str) -> BusId {
        BusId::new(id).unwrap()
    }

    #[test]
    fn test_engine_starts_and_stops() {
        let e = engine();
        // Started event arrives shortly after spawn
        let event = e.events().recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(event, Event::Started));
        drop(e); // joins the thread
    }

    #[test]
    fn test_commands_are_synchronous_and_versioned() {
        let e = engine();
        let v1 = e.add_bus(bus("main"), "Main".into()).unwrap();
        let v2 = e.add_channel(ch("mic"), "Mic".into()).unwrap();
        assert!(v2 > v1);

        let snap = e.snapshot().unwrap();
        assert!(snap.version >= v2);
        assert!(snap.channel(&ch("mic")).is_some());
    }

    #[test]
    fn test_snapshot_version_stable_without_mutation() {
        let e = engine();
        e.add_channel(ch("mic"), "Mic".into()).unwrap();
        let a = e.snapshot().unwrap();
        let b = e.snapshot().unwrap();
        assert_eq!(a.version, b.version);

        e.toggle_mute(ch("mic")).unwrap();
        let c = e.snapshot().unwrap();
        assert!(c.version > b.version);
    }

    #[test]
    fn test_typed_errors_come_back() {
        let e = engine();
        let err = e.remove_channel(ch("ghost")).unwrap_err();
        assert!(matches!(err, MixerError::NotFound(_)));

        let err = e.remove_channel(ChannelId::master()).unwrap_err();
        assert!(matches!(err, MixerError::Conflict(_)));

        e.add_channel(ch("mic"), "Mic".into()).unwrap();
        let err = e.add_channel(ch("mic"), "Mic".into()).unwrap_err();
        assert!(matches!(err, MixerError::Conflict(_)));
    }

    #[test]
    fn test_program_order_is_preserved() {
        let e = engine();
        e.add_bus(bus("main"), "Main".into()).unwrap();
        e.add_channel(ch("mic"), "Mic".into()).unwrap();
        e.set_channel_buses(ch("mic"), BTreeSet::from([bus("main")]))
            .unwrap();
        let v = e.set_volume(ch("mic"), Db::new(-6.0).unwrap()).unwrap();

        let snap = e.snapshot().unwrap();
        assert!(snap.version >= v);
        let mic = snap.channel(&ch("mic")).unwrap();
        assert_eq!(mic.state.volume_db.get(), -6.0);
        assert!(mic.state.bus_ids.contains(&bus("main")));
    }

    #[test]
    fn test_load_state_roundtrip() {
        let e = engine();
        e.add_bus(bus("main"), "Main".into()).unwrap();
        e.add_bus(bus("cue"), "Cue".into()).unwrap();
        e.add_channel(ch("mic"), "Mic".into()).unwrap();
        e.set_channel_buses(ch("mic"), BTreeSet::from([bus("main"), bus("cue")]))
            .unwrap();
        e.set_volume(ch("mic"), Db::new(-3.0).unwrap()).unwrap();

        let saved = e.snapshot().unwrap().to_state();

        // Wipe and restore
        e.load_state(MixerState::default()).unwrap();
        assert!(e.snapshot().unwrap().channel(&ch("mic")).is_none());

        e.load_state(saved.clone()).unwrap();
        let restored = e.snapshot().unwrap().to_state();
        assert_eq!(saved, restored);
    }

    #[test]
    fn test_load_state_rejects_broken_graph() {
        let e = engine();
        let json = r#"{
            "channels": [{"id": "mic", "name": "Mic", "bus_ids": ["ghost"]}],
            "buses": []
        }"#;
        let broken: MixerState = serde_json::from_str(json).unwrap();
        assert!(e.load_state(broken).is_err());
    }

    #[test]
    fn test_custom_engine_rate() {
        let config = EngineConfig {
            sample_rate: SampleRate::Hz96000,
            frames_per_block: 256,
            ..Default::default()
        };
        let e = AudioEngine::start(config).unwrap();
        assert_eq!(e.config().sample_rate.as_hz(), 96_000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            frames_per_block: 1000,
            ..Default::default()
        };
        assert!(AudioEngine::start(config).is_err());
    }

    #[test]
    fn test_ticks_run_without_devices() {
        let config = EngineConfig {
            frames_per_block: 64,
            ..Default::default()
        };
        let e = AudioEngine::start(config).unwrap();
        e.add_bus(bus("main"), "Main".into()).unwrap();
        // A few tick periods pass; the engine stays healthy
        thread::sleep(Duration::from_millis(20));
        assert!(e.snapshot().is_ok());
    }
}

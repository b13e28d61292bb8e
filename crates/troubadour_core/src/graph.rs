//! Mixer Graph
//!
//! Owns the channel and bus tables and the routing edges between them,
//! applies gain/mute/solo, and sums channel inputs into per-bus output
//! buffers. Mutations and processing both happen on the engine thread;
//! readers only ever see the graph through versioned snapshots.
//!
//! The master channel is created with the graph and lives as long as the
//! engine. For mixing purposes it is the final summing point - every
//! bus's post-gain output is folded into the master mix - but it is
//! surfaced as a channel so the UI can render one uniform strip list.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::error::{MixerError, MixerResult};
use crate::ids::{validate_name, BusId, ChannelId};
use crate::snapshot::{
    BusSnapshot, BusState, ChannelSnapshot, ChannelState, EngineSnapshot, MixerState,
};
use troubadour_dsp::{Db, EffectChain, EffectConfig, LevelMeter};

/// One input strip.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub input_device: Option<String>,
    pub gain: Db,
    pub muted: bool,
    pub solo: bool,
    pub is_master: bool,
    pub effects: Vec<EffectConfig>,
    pub buses: BTreeSet<BusId>,
    pub device_error: bool,
    meter: LevelMeter,
}

impl Channel {
    fn from_state(state: ChannelState, is_master: bool, meter_decay: f32) -> Self {
        Self {
            id: state.id,
            name: state.name,
            input_device: state.input_device,
            gain: state.volume_db,
            muted: state.muted,
            solo: state.solo,
            is_master,
            effects: state.effects,
            buses: state.bus_ids,
            device_error: false,
            meter: LevelMeter::new(meter_decay),
        }
    }

    fn to_state(&self) -> ChannelState {
        ChannelState {
            id: self.id.clone(),
            name: self.name.clone(),
            volume_db: self.gain,
            muted: self.muted,
            solo: self.solo,
            input_device: self.input_device.clone(),
            effects: self.effects.clone(),
            bus_ids: self.buses.clone(),
        }
    }

    fn to_snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            state: self.to_state(),
            is_master: self.is_master,
            level_db: self.meter.level(),
            peak_db: self.meter.peak(),
            device_error: self.device_error,
        }
    }
}

/// One summing point.
#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    pub output_device: Option<String>,
    pub gain: Db,
    pub muted: bool,
    pub device_error: bool,
    meter: LevelMeter,
}

impl Bus {
    fn from_state(state: BusState, meter_decay: f32) -> Self {
        Self {
            id: state.id,
            name: state.name,
            output_device: state.output_device,
            gain: state.volume_db,
            muted: state.muted,
            device_error: false,
            meter: LevelMeter::new(meter_decay),
        }
    }

    fn to_state(&self) -> BusState {
        BusState {
            id: self.id.clone(),
            name: self.name.clone(),
            volume_db: self.gain,
            muted: self.muted,
            output_device: self.output_device.clone(),
        }
    }

    fn to_snapshot(&self) -> BusSnapshot {
        BusSnapshot {
            state: self.to_state(),
            level_db: self.meter.level(),
            peak_db: self.meter.peak(),
            device_error: self.device_error,
        }
    }
}

/// Per-channel DSP state, held apart from the graph so a control-plane
/// mutation can swap a chain without copying the tables.
pub struct EffectTable {
    sample_rate: f32,
    chains: HashMap<ChannelId, (Vec<EffectConfig>, EffectChain)>,
}

impl EffectTable {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            chains: HashMap::new(),
        }
    }

    /// Bring the table in line with the graph: build chains for new or
    /// changed channels, drop chains for removed ones. Called between
    /// ticks, never during `process`.
    pub fn sync(&mut self, graph: &MixerGraph) {
        self.chains
            .retain(|id, _| graph.channels.contains_key(id));
        for (id, channel) in &graph.channels {
            let stale = match self.chains.get(id) {
                Some((configs, _)) => configs != &channel.effects,
                None => true,
            };
            if stale {
                debug!(channel = %id, effects = channel.effects.len(), "rebuilding effect chain");
                self.chains.insert(
                    id.clone(),
                    (
                        channel.effects.clone(),
                        EffectChain::from_configs(&channel.effects, self.sample_rate),
                    ),
                );
            }
        }
    }

    fn chain_mut(&mut self, id: &ChannelId) -> Option<&mut EffectChain> {
        self.chains.get_mut(id).map(|(_, chain)| chain)
    }
}

/// The mixer graph: tables, routing, and the summing pass.
pub struct MixerGraph {
    channels: BTreeMap<ChannelId, Channel>,
    buses: BTreeMap<BusId, Bus>,
    /// Bumped by every successful mutation
    version: u64,
    frames_per_block: usize,
    meter_decay: f32,
    /// Seconds covered by one block, for meter decay
    block_secs: f32,
    /// Reused per-bus output buffers, interleaved stereo
    bus_outputs: BTreeMap<BusId, Vec<f32>>,
    /// Master sum of all bus outputs
    master_mix: Vec<f32>,
    /// Per-channel working copy of the input block
    scratch: Vec<f32>,
}

impl MixerGraph {
    pub fn new(sample_rate_hz: u32, frames_per_block: usize, meter_decay: f32) -> Self {
        let block_len = frames_per_block * 2;
        let mut graph = Self {
            channels: BTreeMap::new(),
            buses: BTreeMap::new(),
            version: 0,
            frames_per_block,
            meter_decay,
            block_secs: frames_per_block as f32 / sample_rate_hz as f32,
            bus_outputs: BTreeMap::new(),
            master_mix: vec![0.0; block_len],
            scratch: vec![0.0; block_len],
        };

        // The master strip exists for the engine's whole lifetime
        let master = Channel::from_state(
            ChannelState::new(ChannelId::master(), "Master"),
            true,
            meter_decay,
        );
        graph.channels.insert(master.id.clone(), master);
        graph
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn frames_per_block(&self) -> usize {
        self.frames_per_block
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    // ---- lookups ----------------------------------------------------

    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn bus(&self, id: &BusId) -> Option<&Bus> {
        self.buses.get(id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.buses.values()
    }

    fn channel_mut(&mut self, id: &ChannelId) -> MixerResult<&mut Channel> {
        self.channels
            .get_mut(id)
            .ok_or_else(|| MixerError::not_found(format!("channel '{id}'")))
    }

    fn bus_mut(&mut self, id: &BusId) -> MixerResult<&mut Bus> {
        self.buses
            .get_mut(id)
            .ok_or_else(|| MixerError::not_found(format!("bus '{id}'")))
    }

    // ---- channel mutations ------------------------------------------

    pub fn add_channel(&mut self, id: ChannelId, name: String) -> MixerResult<u64> {
        validate_name(&name)?;
        if self.channels.contains_key(&id) {
            return Err(MixerError::conflict(format!("channel '{id}' already exists")));
        }
        // Only the built-in master may claim the master contract
        if id.is_master() || name.eq_ignore_ascii_case("master") {
            return Err(MixerError::conflict(
                "'master' is reserved for the built-in master channel",
            ));
        }
        let channel = Channel::from_state(ChannelState::new(id.clone(), name), false, self.meter_decay);
        self.channels.insert(id, channel);
        Ok(self.bump())
    }

    pub fn remove_channel(&mut self, id: &ChannelId) -> MixerResult<u64> {
        let channel = self.channel_mut(id)?;
        if channel.is_master {
            return Err(MixerError::conflict("the master channel cannot be removed"));
        }
        self.channels.remove(id);
        Ok(self.bump())
    }

    pub fn set_channel_name(&mut self, id: &ChannelId, name: String) -> MixerResult<u64> {
        validate_name(&name)?;
        let channel = self.channel_mut(id)?;
        if !channel.is_master && name.eq_ignore_ascii_case("master") {
            return Err(MixerError::conflict(
                "'master' is reserved for the built-in master channel",
            ));
        }
        channel.name = name;
        Ok(self.bump())
    }

    pub fn set_channel_input_device(
        &mut self,
        id: &ChannelId,
        device: Option<String>,
    ) -> MixerResult<u64> {
        let channel = self.channel_mut(id)?;
        if channel.is_master {
            return Err(MixerError::conflict("the master channel takes no input device"));
        }
        channel.input_device = device;
        channel.device_error = false;
        Ok(self.bump())
    }

    pub fn set_channel_buses(&mut self, id: &ChannelId, buses: BTreeSet<BusId>) -> MixerResult<u64> {
        for bus_id in &buses {
            if !self.buses.contains_key(bus_id) {
                return Err(MixerError::not_found(format!("bus '{bus_id}'")));
            }
        }
        let channel = self.channel_mut(id)?;
        if channel.is_master {
            return Err(MixerError::conflict(
                "the master channel is the final sink and has no bus membership",
            ));
        }
        channel.buses = buses;
        Ok(self.bump())
    }

    pub fn set_channel_gain(&mut self, id: &ChannelId, gain: Db) -> MixerResult<u64> {
        self.channel_mut(id)?.gain = gain;
        Ok(self.bump())
    }

    /// Returns (version, new mute state).
    pub fn toggle_mute(&mut self, id: &ChannelId) -> MixerResult<(u64, bool)> {
        let channel = self.channel_mut(id)?;
        channel.muted = !channel.muted;
        let muted = channel.muted;
        Ok((self.bump(), muted))
    }

    /// Returns (version, new solo state).
    pub fn toggle_solo(&mut self, id: &ChannelId) -> MixerResult<(u64, bool)> {
        let channel = self.channel_mut(id)?;
        channel.solo = !channel.solo;
        let solo = channel.solo;
        Ok((self.bump(), solo))
    }

    pub fn set_channel_effects(
        &mut self,
        id: &ChannelId,
        effects: Vec<EffectConfig>,
    ) -> MixerResult<u64> {
        self.channel_mut(id)?.effects = effects;
        Ok(self.bump())
    }

    /// Record a stream failure: the assignment is released so the device
    /// can be retried, and the channel is flagged for the UI.
    pub fn fail_channel_device(&mut self, id: &ChannelId) -> MixerResult<u64> {
        let channel = self.channel_mut(id)?;
        channel.input_device = None;
        channel.device_error = true;
        Ok(self.bump())
    }

    // ---- bus mutations ----------------------------------------------

    pub fn add_bus(&mut self, id: BusId, name: String) -> MixerResult<u64> {
        validate_name(&name)?;
        if self.buses.contains_key(&id) {
            return Err(MixerError::conflict(format!("bus '{id}' already exists")));
        }
        let bus = Bus::from_state(BusState::new(id.clone(), name), self.meter_decay);
        self.buses.insert(id, bus);
        Ok(self.bump())
    }

    /// Removing a bus silently prunes it from every channel's membership.
    pub fn remove_bus(&mut self, id: &BusId) -> MixerResult<u64> {
        if self.buses.remove(id).is_none() {
            return Err(MixerError::not_found(format!("bus '{id}'")));
        }
        for channel in self.channels.values_mut() {
            channel.buses.remove(id);
        }
        Ok(self.bump())
    }

    pub fn set_bus_output_device(&mut self, id: &BusId, device: Option<String>) -> MixerResult<u64> {
        let bus = self.bus_mut(id)?;
        bus.output_device = device;
        bus.device_error = false;
        Ok(self.bump())
    }

    pub fn set_bus_gain(&mut self, id: &BusId, gain: Db) -> MixerResult<u64> {
        self.bus_mut(id)?.gain = gain;
        Ok(self.bump())
    }

    /// Returns (version, new mute state).
    pub fn toggle_bus_mute(&mut self, id: &BusId) -> MixerResult<(u64, bool)> {
        let bus = self.bus_mut(id)?;
        bus.muted = !bus.muted;
        let muted = bus.muted;
        Ok((self.bump(), muted))
    }

    /// Bus counterpart of [`fail_channel_device`](Self::fail_channel_device).
    pub fn fail_bus_device(&mut self, id: &BusId) -> MixerResult<u64> {
        let bus = self.bus_mut(id)?;
        bus.output_device = None;
        bus.device_error = true;
        Ok(self.bump())
    }

    // ---- whole-graph operations -------------------------------------

    /// Replace the entire graph atomically. The state must pass
    /// [`MixerState::validate`]; on any failure the graph is untouched.
    /// Meters reset; the version keeps counting up.
    pub fn load_state(&mut self, state: MixerState) -> MixerResult<u64> {
        state.validate()?;

        let mut channels = BTreeMap::new();
        let mut buses = BTreeMap::new();

        let mut has_master = false;
        for channel_state in state.channels {
            let is_master = channel_state.is_master();
            has_master |= is_master;
            let channel = Channel::from_state(channel_state, is_master, self.meter_decay);
            channels.insert(channel.id.clone(), channel);
        }
        if !has_master {
            let master = Channel::from_state(
                ChannelState::new(ChannelId::master(), "Master"),
                true,
                self.meter_decay,
            );
            channels.insert(master.id.clone(), master);
        }

        for bus_state in state.buses {
            let bus = Bus::from_state(bus_state, self.meter_decay);
            buses.insert(bus.id.clone(), bus);
        }

        self.channels = channels;
        self.buses = buses;
        self.bus_outputs.clear();
        Ok(self.bump())
    }

    /// Copy the observable state into an immutable snapshot. The version
    /// is the one stamped by the last mutation; processing ticks do not
    /// bump it.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: self.version,
            channels: self.channels.values().map(Channel::to_snapshot).collect(),
            buses: self.buses.values().map(Bus::to_snapshot).collect(),
            xruns: Vec::new(),
        }
    }

    // ---- processing -------------------------------------------------

    /// Sum one block. `inputs` maps channels to their current input
    /// blocks, already at the engine rate; missing channels are silent,
    /// unknown ids are ignored. Effect state comes from `effects` so the
    /// table can be rebuilt without touching the graph.
    ///
    /// Outputs are readable through [`bus_output`](Self::bus_output) /
    /// [`outputs`](Self::outputs) / [`master_output`](Self::master_output)
    /// until the next call.
    pub fn process(&mut self, inputs: &HashMap<ChannelId, &[f32]>, effects: &mut EffectTable) {
        let block_len = self.frames_per_block * 2;
        let dt = self.block_secs;

        // Solo on any audible channel silences every non-solo channel.
        // The master strip is the sink, not a source; it never solos.
        let any_solo = self
            .channels
            .values()
            .any(|c| !c.is_master && c.solo && !c.muted);

        // Make sure each bus has a zeroed output buffer of this block size
        let buses = &self.buses;
        self.bus_outputs.retain(|id, _| buses.contains_key(id));
        for id in self.buses.keys() {
            let buffer = self
                .bus_outputs
                .entry(id.clone())
                .or_insert_with(|| Vec::with_capacity(block_len));
            buffer.clear();
            buffer.resize(block_len, 0.0);
        }

        let scratch = &mut self.scratch;
        scratch.resize(block_len, 0.0);

        for (id, channel) in self.channels.iter_mut() {
            if channel.is_master {
                continue;
            }

            let input = match inputs.get(id) {
                Some(input) => *input,
                None => {
                    // No device block this tick: silence, decayed meter
                    channel.meter.decay(dt);
                    continue;
                }
            };

            let audible = !channel.muted && (!any_solo || channel.solo);
            if !audible {
                channel.meter.decay(dt);
                continue;
            }

            // Work on a scratch copy so effects never touch the input
            let copied = input.len().min(block_len);
            scratch[..copied].copy_from_slice(&input[..copied]);
            scratch[copied..].fill(0.0);

            if let Some(chain) = effects.chain_mut(id) {
                chain.process(scratch);
            }

            let gain = channel.gain.to_linear();
            if (gain - 1.0).abs() > f32::EPSILON {
                for sample in scratch.iter_mut() {
                    *sample *= gain;
                }
            }

            // Meter the post-gain, pre-sum signal
            channel.meter.update(scratch, dt);

            for bus_id in &channel.buses {
                if let Some(buffer) = self.bus_outputs.get_mut(bus_id) {
                    for (out, &sample) in buffer.iter_mut().zip(scratch.iter()) {
                        *out += sample;
                    }
                }
            }
        }

        // Bus stage: gain, mute, meter on the post-sum signal; fold the
        // result into the master mix
        let master_mix = &mut self.master_mix;
        master_mix.clear();
        master_mix.resize(block_len, 0.0);

        for (id, bus) in self.buses.iter_mut() {
            let buffer = match self.bus_outputs.get_mut(id) {
                Some(buffer) => buffer,
                None => continue,
            };
            if bus.muted {
                buffer.fill(0.0);
            } else {
                let gain = bus.gain.to_linear();
                if (gain - 1.0).abs() > f32::EPSILON {
                    for sample in buffer.iter_mut() {
                        *sample *= gain;
                    }
                }
            }
            bus.meter.update(buffer, dt);

            for (out, &sample) in master_mix.iter_mut().zip(buffer.iter()) {
                *out += sample;
            }
        }

        // Master stage: the distinguished channel taps the sum of all
        // buses - its own effects, gain and mute apply to that sum
        if let Some(master) = self.channels.values_mut().find(|c| c.is_master) {
            if master.muted {
                master_mix.fill(0.0);
            } else {
                if let Some(chain) = effects.chain_mut(&master.id) {
                    chain.process(master_mix);
                }
                let gain = master.gain.to_linear();
                if (gain - 1.0).abs() > f32::EPSILON {
                    for sample in master_mix.iter_mut() {
                        *sample *= gain;
                    }
                }
            }
            master.meter.update(master_mix, dt);
        }
    }

    /// A bus's output from the last `process` call.
    pub fn bus_output(&self, id: &BusId) -> Option<&[f32]> {
        self.bus_outputs.get(id).map(Vec::as_slice)
    }

    /// All bus outputs from the last `process` call.
    pub fn outputs(&self) -> impl Iterator<Item = (&BusId, &[f32])> {
        self.bus_outputs.iter().map(|(id, buf)| (id, buf.as_slice()))
    }

    /// The master mix from the last `process` call.
    pub fn master_output(&self) -> &[f32] {
        &self.master_mix
    }
}

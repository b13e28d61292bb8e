//! Engine State and Snapshots
//!
//! Two closely related shapes of the same data:
//!
//! - [`MixerState`] is the persistent, settable part of the graph - what
//!   a preset document stores and `load-snapshot` accepts.
//! - [`EngineSnapshot`] is the immutable, versioned value readers
//!   receive: the state plus derived observables (levels, peaks, error
//!   flags). A given version's contents never change.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{MixerError, MixerResult};
use crate::ids::{validate_name, BusId, ChannelId};
use troubadour_dsp::{Db, EffectConfig};

/// Settable attributes of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub volume_db: Db,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectConfig>,
    #[serde(default)]
    pub bus_ids: BTreeSet<BusId>,
}

impl ChannelState {
    pub fn new(id: ChannelId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            volume_db: Db::UNITY,
            muted: false,
            solo: false,
            input_device: None,
            effects: Vec::new(),
            bus_ids: BTreeSet::new(),
        }
    }

    /// The master contract: the literal id, or a display-name that is
    /// case-insensitively "master".
    pub fn is_master(&self) -> bool {
        self.id.is_master() || self.name.eq_ignore_ascii_case("master")
    }
}

/// Settable attributes of one bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub id: BusId,
    pub name: String,
    #[serde(default)]
    pub volume_db: Db,
    #[serde(default)]
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

impl BusState {
    pub fn new(id: BusId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            volume_db: Db::UNITY,
            muted: false,
            output_device: None,
        }
    }
}

/// The whole settable graph, as stored in documents and presets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MixerState {
    #[serde(default)]
    pub channels: Vec<ChannelState>,
    #[serde(default)]
    pub buses: Vec<BusState>,
}

impl MixerState {
    /// Check the structural invariants a graph must uphold: unique ids,
    /// memberships that reference existing buses, at most one master.
    pub fn validate(&self) -> MixerResult<()> {
        let mut channel_ids = BTreeSet::new();
        let mut masters = 0usize;
        for channel in &self.channels {
            validate_name(&channel.name)?;
            if !channel_ids.insert(&channel.id) {
                return Err(MixerError::conflict(format!(
                    "duplicate channel id '{}'",
                    channel.id
                )));
            }
            if channel.is_master() {
                masters += 1;
                // The master is the final sink: the same limits the
                // single-field setters enforce hold for bulk loads
                if channel.input_device.is_some() {
                    return Err(MixerError::conflict(format!(
                        "master channel '{}' takes no input device",
                        channel.id
                    )));
                }
                if !channel.bus_ids.is_empty() {
                    return Err(MixerError::conflict(format!(
                        "master channel '{}' is the final sink and has no bus membership",
                        channel.id
                    )));
                }
            }
        }
        if masters > 1 {
            return Err(MixerError::conflict("more than one master channel"));
        }

        let mut bus_ids = BTreeSet::new();
        for bus in &self.buses {
            validate_name(&bus.name)?;
            if !bus_ids.insert(&bus.id) {
                return Err(MixerError::conflict(format!("duplicate bus id '{}'", bus.id)));
            }
        }

        for channel in &self.channels {
            for bus_id in &channel.bus_ids {
                if !bus_ids.contains(bus_id) {
                    return Err(MixerError::validation(format!(
                        "channel '{}' routes to unknown bus '{}'",
                        channel.id, bus_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One channel as seen by readers: state plus observables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    #[serde(flatten)]
    pub state: ChannelState,
    pub is_master: bool,
    pub level_db: Db,
    pub peak_db: Db,
    pub device_error: bool,
}

/// One bus as seen by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSnapshot {
    #[serde(flatten)]
    pub state: BusState,
    pub level_db: Db,
    pub peak_db: Db,
    pub device_error: bool,
}

/// Per-device transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrunCounts {
    pub device: String,
    pub overruns: u64,
    pub underruns: u64,
}

/// Immutable, versioned view of the engine's observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Monotonically increasing; a given version's contents never change
    pub version: u64,
    pub channels: Vec<ChannelSnapshot>,
    pub buses: Vec<BusSnapshot>,
    #[serde(default)]
    pub xruns: Vec<XrunCounts>,
}

impl EngineSnapshot {
    /// Project the settable part back out, for persistence.
    pub fn to_state(&self) -> MixerState {
        MixerState {
            channels: self.channels.iter().map(|c| c.state.clone()).collect(),
            buses: self.buses.iter().map(|b| b.state.clone()).collect(),
        }
    }

    pub fn channel(&self, id: &ChannelId) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| &c.state.id == id)
    }

    pub fn bus(&self, id: &BusId) -> Option<&BusSnapshot> {
        self.buses.iter().find(|b| &b.state.id == id)
    }
}

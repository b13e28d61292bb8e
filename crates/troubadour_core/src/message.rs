//! Message Types for Thread Communication
//!
//! Commands flow from the control thread to the engine thread and are
//! applied between processing ticks; each carries a reply channel so the
//! issuing call is synchronous. Events flow the other way and are
//! serializable for the UI transport.

use std::collections::BTreeSet;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::error::MixerResult;
use crate::ids::{BusId, ChannelId};
use crate::snapshot::{EngineSnapshot, MixerState};
use troubadour_dsp::Db;

/// Asynchronous notifications from the engine to its host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    /// Engine thread is up and ticking
    Started,

    /// Engine thread has shut down
    Stopped,

    /// A stream failed or could not be opened; the assignment has been
    /// cleared and the owning entity flagged.
    DeviceError {
        /// "channel:<id>" or "bus:<id>"
        entity: String,
        device: String,
        message: String,
    },

    /// A file in the preset directory changed; cached preset listings
    /// and loaded snapshots may be stale.
    SnapshotInvalidated,
}

impl Event {
    pub fn device_error(
        entity: impl Into<String>,
        device: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Event::DeviceError {
            entity: entity.into(),
            device: device.into(),
            message: message.to_string(),
        }
    }
}

/// Commands applied by the engine thread between ticks.
///
/// Each mutation replies with the snapshot version it produced, so the
/// caller knows exactly which snapshot reflects its change.
pub(crate) enum Command {
    AddChannel {
        id: ChannelId,
        name: String,
        reply: Sender<MixerResult<u64>>,
    },
    RemoveChannel {
        id: ChannelId,
        reply: Sender<MixerResult<u64>>,
    },
    SetChannelName {
        id: ChannelId,
        name: String,
        reply: Sender<MixerResult<u64>>,
    },
    SetChannelInputDevice {
        id: ChannelId,
        device: Option<String>,
        reply: Sender<MixerResult<u64>>,
    },
    SetChannelBuses {
        id: ChannelId,
        buses: BTreeSet<BusId>,
        reply: Sender<MixerResult<u64>>,
    },
    SetChannelGain {
        id: ChannelId,
        gain: Db,
        reply: Sender<MixerResult<u64>>,
    },
    ToggleMute {
        id: ChannelId,
        reply: Sender<MixerResult<(u64, bool)>>,
    },
    ToggleSolo {
        id: ChannelId,
        reply: Sender<MixerResult<(u64, bool)>>,
    },
    AddBus {
        id: BusId,
        name: String,
        reply: Sender<MixerResult<u64>>,
    },
    RemoveBus {
        id: BusId,
        reply: Sender<MixerResult<u64>>,
    },
    SetBusOutputDevice {
        id: BusId,
        device: Option<String>,
        reply: Sender<MixerResult<u64>>,
    },
    SetBusGain {
        id: BusId,
        gain: Db,
        reply: Sender<MixerResult<u64>>,
    },
    ToggleBusMute {
        id: BusId,
        reply: Sender<MixerResult<(u64, bool)>>,
    },
    /// Replace the whole graph, reconciling streams
    LoadState {
        state: MixerState,
        reply: Sender<MixerResult<u64>>,
    },
    GetSnapshot {
        reply: Sender<EngineSnapshot>,
    },
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::device_error("channel:mic", "USB Audio", "stream died");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("device-error"));

        let back: Event = serde_json::from_str(&json).unwrap();
        if let Event::DeviceError { entity, device, .. } = back {
            assert_eq!(entity, "channel:mic");
            assert_eq!(device, "USB Audio");
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn test_lifecycle_events_roundtrip() {
        for event in [Event::Started, Event::Stopped, Event::SnapshotInvalidated] {
            let json = serde_json::to_string(&event).unwrap();
            let back: Event = serde_json::from_str(&json).unwrap();
            assert_eq!(
                std::mem::discriminant(&event),
                std::mem::discriminant(&back)
            );
        }
    }
}

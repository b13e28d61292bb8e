//! Control / Query Surface
//!
//! The command transport: tagged requests in, result-or-typed-error
//! responses out. Kind strings and parameter names are the stable wire
//! contract; the encoding (JSON lines over stdio, or direct in-process
//! calls) is up to the host. Unknown kinds fail request parsing and are
//! reported as validation errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{self, AudioDeviceInfo};
use crate::document::MixerDocument;
use crate::engine::AudioEngine;
use crate::error::{ErrorKind, MixerError, MixerResult};
use crate::ids::{BusId, ChannelId};
use crate::presets::PresetStore;
use crate::snapshot::{BusSnapshot, ChannelSnapshot, EngineSnapshot, MixerState};
use troubadour_dsp::Db;

/// Every command the control surface recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Request {
    ListAudioDevices,
    ListInputDevices,
    ListOutputDevices,
    GetChannels,
    GetBuses,
    GetSnapshot,
    #[serde(rename_all = "camelCase")]
    AddChannel { id: String, name: String },
    #[serde(rename_all = "camelCase")]
    RemoveChannel { id: String },
    #[serde(rename_all = "camelCase")]
    SetChannelName { id: String, name: String },
    #[serde(rename_all = "camelCase")]
    SetVolume { channel_id: String, volume_db: f32 },
    #[serde(rename_all = "camelCase")]
    ToggleMute { channel_id: String },
    #[serde(rename_all = "camelCase")]
    ToggleSolo { channel_id: String },
    #[serde(rename_all = "camelCase")]
    SetChannelInputDevice {
        channel_id: String,
        #[serde(default)]
        device_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetChannelInputDevice { channel_id: String },
    #[serde(rename_all = "camelCase")]
    SetChannelBuses {
        channel_id: String,
        bus_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetChannelBuses { channel_id: String },
    #[serde(rename_all = "camelCase")]
    AddBus { id: String, name: String },
    #[serde(rename_all = "camelCase")]
    RemoveBus { id: String },
    #[serde(rename_all = "camelCase")]
    SetBusOutputDevice {
        bus_id: String,
        #[serde(default)]
        device_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SetBusVolume { bus_id: String, volume_db: f32 },
    #[serde(rename_all = "camelCase")]
    ToggleBusMute { bus_id: String },
    #[serde(rename_all = "camelCase")]
    LoadSnapshot { snapshot: MixerState },
    LoadConfig,
    SaveConfig,
    ListPresets,
    #[serde(rename_all = "camelCase")]
    LoadPreset { name: String },
    #[serde(rename_all = "camelCase")]
    SavePreset { name: String },
    #[serde(rename_all = "camelCase")]
    DeletePreset { name: String },
}

impl Request {
    /// Parse a wire request; anything serde rejects (unknown kind, bad
    /// parameter shape) is a validation error.
    pub fn from_json(text: &str) -> MixerResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| MixerError::validation(format!("unrecognized command: {e}")))
    }
}

/// Successful response payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseBody {
    /// The snapshot version stamped by a mutation
    Version { version: u64 },
    /// Version plus the resulting flag state, for toggles
    Toggled { version: u64, enabled: bool },
    Devices(Vec<AudioDeviceInfo>),
    Channels(Vec<ChannelSnapshot>),
    Buses(Vec<BusSnapshot>),
    Snapshot(EngineSnapshot),
    InputDevice { device_id: Option<String> },
    BusIds { bus_ids: Vec<BusId> },
    Presets { presets: Vec<String> },
    /// Side-effect-only commands (save-config, delete-preset)
    Done,
}

/// A wire response: a result payload or a typed error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "kebab-case")]
pub enum Response {
    Ok(ResponseBody),
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn to_json(&self) -> String {
        // Response contains only serializable plain data; if this ever
        // fails, report that instead of panicking
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!("{{\"status\":\"error\",\"kind\":\"fatal\",\"message\":\"encoding response: {e}\"}}")
        })
    }
}

impl From<MixerResult<ResponseBody>> for Response {
    fn from(result: MixerResult<ResponseBody>) -> Self {
        match result {
            Ok(body) => Response::Ok(body),
            Err(err) => Response::Error {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Binds the engine, the preset store and the config document into one
/// request dispatcher. Lives on the control thread.
pub struct Controller {
    engine: AudioEngine,
    presets: PresetStore,
    config_path: PathBuf,
}

impl Controller {
    pub fn new(engine: AudioEngine, presets: PresetStore, config_path: PathBuf) -> Self {
        Self {
            engine,
            presets,
            config_path,
        }
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    /// Apply one request and produce its wire response.
    pub fn dispatch(&self, request: Request) -> Response {
        debug!(?request, "dispatching command");
        self.handle(request).into()
    }

    fn handle(&self, request: Request) -> MixerResult<ResponseBody> {
        match request {
            Request::ListAudioDevices => Ok(ResponseBody::Devices(device::enumerate_all()?)),
            Request::ListInputDevices => Ok(ResponseBody::Devices(device::enumerate_inputs()?)),
            Request::ListOutputDevices => Ok(ResponseBody::Devices(device::enumerate_outputs()?)),

            Request::GetChannels => Ok(ResponseBody::Channels(self.engine.snapshot()?.channels)),
            Request::GetBuses => Ok(ResponseBody::Buses(self.engine.snapshot()?.buses)),
            Request::GetSnapshot => Ok(ResponseBody::Snapshot(self.engine.snapshot()?)),

            Request::AddChannel { id, name } => {
                let version = self.engine.add_channel(ChannelId::new(id)?, name)?;
                Ok(ResponseBody::Version { version })
            }
            Request::RemoveChannel { id } => {
                let version = self.engine.remove_channel(ChannelId::new(id)?)?;
                Ok(ResponseBody::Version { version })
            }
            Request::SetChannelName { id, name } => {
                let version = self.engine.set_channel_name(ChannelId::new(id)?, name)?;
                Ok(ResponseBody::Version { version })
            }
            Request::SetVolume {
                channel_id,
                volume_db,
            } => {
                let version = self
                    .engine
                    .set_volume(ChannelId::new(channel_id)?, Db::new(volume_db)?)?;
                Ok(ResponseBody::Version { version })
            }
            Request::ToggleMute { channel_id } => {
                let (version, enabled) = self.engine.toggle_mute(ChannelId::new(channel_id)?)?;
                Ok(ResponseBody::Toggled { version, enabled })
            }
            Request::ToggleSolo { channel_id } => {
                let (version, enabled) = self.engine.toggle_solo(ChannelId::new(channel_id)?)?;
                Ok(ResponseBody::Toggled { version, enabled })
            }
            Request::SetChannelInputDevice {
                channel_id,
                device_id,
            } => {
                let version = self
                    .engine
                    .set_channel_input_device(ChannelId::new(channel_id)?, device_id)?;
                Ok(ResponseBody::Version { version })
            }
            Request::GetChannelInputDevice { channel_id } => {
                let id = ChannelId::new(channel_id)?;
                let snapshot = self.engine.snapshot()?;
                let channel = snapshot
                    .channel(&id)
                    .ok_or_else(|| MixerError::not_found(format!("channel '{id}'")))?;
                Ok(ResponseBody::InputDevice {
                    device_id: channel.state.input_device.clone(),
                })
            }
            Request::SetChannelBuses {
                channel_id,
                bus_ids,
            } => {
                let buses = bus_ids
                    .into_iter()
                    .map(BusId::new)
                    .collect::<MixerResult<_>>()?;
                let version = self
                    .engine
                    .set_channel_buses(ChannelId::new(channel_id)?, buses)?;
                Ok(ResponseBody::Version { version })
            }
            Request::GetChannelBuses { channel_id } => {
                let id = ChannelId::new(channel_id)?;
                let snapshot = self.engine.snapshot()?;
                let channel = snapshot
                    .channel(&id)
                    .ok_or_else(|| MixerError::not_found(format!("channel '{id}'")))?;
                Ok(ResponseBody::BusIds {
                    bus_ids: channel.state.bus_ids.iter().cloned().collect(),
                })
            }

            Request::AddBus { id, name } => {
                let version = self.engine.add_bus(BusId::new(id)?, name)?;
                Ok(ResponseBody::Version { version })
            }
            Request::RemoveBus { id } => {
                let version = self.engine.remove_bus(BusId::new(id)?)?;
                Ok(ResponseBody::Version { version })
            }
            Request::SetBusOutputDevice { bus_id, device_id } => {
                let version = self
                    .engine
                    .set_bus_output_device(BusId::new(bus_id)?, device_id)?;
                Ok(ResponseBody::Version { version })
            }
            Request::SetBusVolume { bus_id, volume_db } => {
                let version = self
                    .engine
                    .set_bus_volume(BusId::new(bus_id)?, Db::new(volume_db)?)?;
                Ok(ResponseBody::Version { version })
            }
            Request::ToggleBusMute { bus_id } => {
                let (version, enabled) = self.engine.toggle_bus_mute(BusId::new(bus_id)?)?;
                Ok(ResponseBody::Toggled { version, enabled })
            }

            Request::LoadSnapshot { snapshot } => {
                let version = self.engine.load_state(snapshot)?;
                Ok(ResponseBody::Version { version })
            }

            Request::LoadConfig => {
                let document = MixerDocument::load_or_default(&self.config_path)?;
                let version = self.engine.load_state(document.mixer)?;
                Ok(ResponseBody::Version { version })
            }
            Request::SaveConfig => {
                let state = self.engine.snapshot()?.to_state();
                let document = MixerDocument::from_parts(self.engine.config(), state);
                document.save(&self.config_path)?;
                Ok(ResponseBody::Done)
            }

            Request::ListPresets => Ok(ResponseBody::Presets {
                presets: self.presets.list()?,
            }),
            Request::LoadPreset { name } => {
                let document = self.presets.load(&name)?;
                let version = self.engine.load_state(document.mixer)?;
                Ok(ResponseBody::Version { version })
            }
            Request::SavePreset { name } => {
                let state = self.engine.snapshot()?.to_state();
                let document = MixerDocument::from_parts(self.engine.config(), state);
                self.presets.save(&name, &document)?;
                Ok(ResponseBody::Done)
            }
            Request::DeletePreset { name } => {
                self.presets.delete(&name)?;
                Ok(ResponseBody::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn controller() -> (tempfile::TempDir, Controller) {
        let dir = tempfile::tempdir().unwrap();
        let engine = AudioEngine::start(EngineConfig::default()).unwrap();
        let presets = PresetStore::open(dir.path().join("presets")).unwrap();
        let config_path = dir.path().join("config.toml");
        (dir, Controller::new(engine, presets, config_path))
    }

    fn expect_version(response: Response) -> u64 {
        match response {
            Response::Ok(ResponseBody::Version { version }) => version,
            other => panic!("expected version, got {other:?}"),
        }
    }

    #[test]
    fn test_kind_strings_on_the_wire() {
        let json = serde_json::to_string(&Request::ListAudioDevices).unwrap();
        assert_eq!(json, r#"{"kind":"list-audio-devices"}"#);

        let request = Request::SetVolume {
            channel_id: "mic".into(),
            volume_db: -6.0,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"kind\":\"set-volume\""));
        assert!(json.contains("\"channelId\":\"mic\""));
        assert!(json.contains("\"volumeDb\":-6.0"));
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let err = Request::from_json(r#"{"kind":"warp-drive"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_add_and_query_channel() {
        let (_dir, ctl) = controller();
        expect_version(ctl.dispatch(Request::AddBus {
            id: "main".into(),
            name: "Main".into(),
        }));
        expect_version(ctl.dispatch(Request::AddChannel {
            id: "mic".into(),
            name: "Mic".into(),
        }));
        expect_version(ctl.dispatch(Request::SetChannelBuses {
            channel_id: "mic".into(),
            bus_ids: vec!["main".into()],
        }));

        match ctl.dispatch(Request::GetChannelBuses {
            channel_id: "mic".into(),
        }) {
            Response::Ok(ResponseBody::BusIds { bus_ids }) => {
                assert_eq!(bus_ids, vec![BusId::new("main").unwrap()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_errors_are_typed_on_the_wire() {
        let (_dir, ctl) = controller();
        let response = ctl.dispatch(Request::RemoveChannel { id: "ghost".into() });
        match response {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::NotFound);
                assert!(message.contains("ghost"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let json = ctl
            .dispatch(Request::RemoveChannel { id: "ghost".into() })
            .to_json();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"kind\":\"not-found\""));
    }

    #[test]
    fn test_non_finite_volume_rejected() {
        let (_dir, ctl) = controller();
        ctl.dispatch(Request::AddChannel {
            id: "mic".into(),
            name: "Mic".into(),
        });

        let response = ctl.dispatch(Request::SetVolume {
            channel_id: "mic".into(),
            volume_db: f32::NAN,
        });
        assert!(matches!(
            response,
            Response::Error {
                kind: ErrorKind::Validation,
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_range_volume_clamps() {
        let (_dir, ctl) = controller();
        ctl.dispatch(Request::AddChannel {
            id: "mic".into(),
            name: "Mic".into(),
        });
        expect_version(ctl.dispatch(Request::SetVolume {
            channel_id: "mic".into(),
            volume_db: 99.0,
        }));

        match ctl.dispatch(Request::GetChannels) {
            Response::Ok(ResponseBody::Channels(channels)) => {
                let mic = channels
                    .iter()
                    .find(|c| c.state.id.as_str() == "mic")
                    .unwrap();
                assert_eq!(mic.state.volume_db.get(), 18.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_preset_workflow_over_the_wire() {
        let (_dir, ctl) = controller();
        ctl.dispatch(Request::AddBus {
            id: "main".into(),
            name: "Main".into(),
        });
        ctl.dispatch(Request::AddChannel {
            id: "mic".into(),
            name: "Mic".into(),
        });

        assert_eq!(
            ctl.dispatch(Request::SavePreset { name: "gig".into() }),
            Response::Ok(ResponseBody::Done)
        );

        match ctl.dispatch(Request::ListPresets) {
            Response::Ok(ResponseBody::Presets { presets }) => {
                assert_eq!(presets, vec!["gig"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Wipe, then restore from the preset
        expect_version(ctl.dispatch(Request::LoadSnapshot {
            snapshot: MixerState::default(),
        }));
        expect_version(ctl.dispatch(Request::LoadPreset { name: "gig".into() }));

        match ctl.dispatch(Request::GetChannels) {
            Response::Ok(ResponseBody::Channels(channels)) => {
                assert!(channels.iter().any(|c| c.state.id.as_str() == "mic"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_config_save_then_load() {
        let (_dir, ctl) = controller();
        ctl.dispatch(Request::AddBus {
            id: "main".into(),
            name: "Main".into(),
        });
        assert_eq!(
            ctl.dispatch(Request::SaveConfig),
            Response::Ok(ResponseBody::Done)
        );

        expect_version(ctl.dispatch(Request::LoadSnapshot {
            snapshot: MixerState::default(),
        }));
        expect_version(ctl.dispatch(Request::LoadConfig));

        match ctl.dispatch(Request::GetBuses) {
            Response::Ok(ResponseBody::Buses(buses)) => {
                assert!(buses.iter().any(|b| b.state.id.as_str() == "main"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_request_roundtrip_through_json() {
        let requests = vec![
            Request::GetSnapshot,
            Request::ToggleMute {
                channel_id: "mic".into(),
            },
            Request::SetChannelInputDevice {
                channel_id: "mic".into(),
                device_id: None,
            },
            Request::SetBusVolume {
                bus_id: "main".into(),
                volume_db: -3.0,
            },
            Request::DeletePreset { name: "gig".into() },
        ];
        for request in requests {
            let json = serde_json::to_string(&request).unwrap();
            let back = Request::from_json(&json).unwrap();
            assert_eq!(request, back);
        }
    }
}

//! Audio Device Enumeration
//!
//! Thin wrapper over cpal's host API. Devices are identified by their
//! name string - cpal exposes no stabler id - so the same string appears
//! as `DeviceId` in channel and bus assignments.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::{MixerError, MixerResult};

/// Direction of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Input,
    Output,
}

/// Description of one hardware device, as reported to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    /// Identifier used in assignments (the device name)
    pub id: String,

    /// Human-readable name
    pub name: String,

    pub kind: DeviceKind,

    /// Whether this is the system default for its direction
    pub is_default: bool,

    /// Native sample rate reported by the device's default config
    pub default_sample_rate: u32,

    /// Maximum channel count across supported configs
    pub max_channels: u16,
}

/// Enumerate every input and output device on the default host.
pub fn enumerate_all() -> MixerResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Some(info) = describe(&device, DeviceKind::Input, default_input.as_deref()) {
                devices.push(info);
            }
        }
    }
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Some(info) = describe(&device, DeviceKind::Output, default_output.as_deref()) {
                devices.push(info);
            }
        }
    }

    Ok(devices)
}

/// Enumerate input devices only.
pub fn enumerate_inputs() -> MixerResult<Vec<AudioDeviceInfo>> {
    Ok(enumerate_all()?
        .into_iter()
        .filter(|d| d.kind == DeviceKind::Input)
        .collect())
}

/// Enumerate output devices only.
pub fn enumerate_outputs() -> MixerResult<Vec<AudioDeviceInfo>> {
    Ok(enumerate_all()?
        .into_iter()
        .filter(|d| d.kind == DeviceKind::Output)
        .collect())
}

/// Resolve a device id to a cpal input device.
pub fn find_input(id: &str) -> MixerResult<cpal::Device> {
    let host = cpal::default_host();
    host.input_devices()
        .map_err(|e| MixerError::device(format!("enumerating input devices: {e}")))?
        .find(|d| d.name().map(|n| n == id).unwrap_or(false))
        .ok_or_else(|| MixerError::not_found(format!("input device '{id}'")))
}

/// Resolve a device id to a cpal output device.
pub fn find_output(id: &str) -> MixerResult<cpal::Device> {
    let host = cpal::default_host();
    host.output_devices()
        .map_err(|e| MixerError::device(format!("enumerating output devices: {e}")))?
        .find(|d| d.name().map(|n| n == id).unwrap_or(false))
        .ok_or_else(|| MixerError::not_found(format!("output device '{id}'")))
}

fn describe(
    device: &cpal::Device,
    kind: DeviceKind,
    default_name: Option<&str>,
) -> Option<AudioDeviceInfo> {
    let name = device.name().ok()?;

    let (default_sample_rate, max_channels) = match kind {
        DeviceKind::Input => device
            .default_input_config()
            .map(|c| (c.sample_rate().0, c.channels()))
            .unwrap_or((0, 0)),
        DeviceKind::Output => device
            .default_output_config()
            .map(|c| (c.sample_rate().0, c.channels()))
            .unwrap_or((0, 0)),
    };

    Some(AudioDeviceInfo {
        id: name.clone(),
        is_default: default_name.map(|d| d == name).unwrap_or(false),
        name,
        kind,
        default_sample_rate,
        max_channels,
    })
}

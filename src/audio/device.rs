//! Audio device enumeration

use cpal::traits::{DeviceTrait, HostTrait};

use super::error::EngineError;

/// Unique identifier for an audio device (its display name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl From<&str> for DeviceId {
    fn from(name: &str) -> Self {
        DeviceId(name.to_string())
    }
}

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device identifier
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Default sample rate (Hz), if the device reports one
    pub default_sample_rate: Option<u32>,
    /// Default channel count, if the device reports one
    pub default_channels: Option<u16>,
    /// Whether this is the default device
    pub is_default: bool,
}

/// List available input (capture) devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>, EngineError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let config = device.default_input_config().ok();
            describe(&device, default_name.as_deref(), config)
        })
        .collect())
}

/// List available output (playback) devices
pub fn list_output_devices() -> Result<Vec<AudioDevice>, EngineError> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let config = device.default_output_config().ok();
            describe(&device, default_name.as_deref(), config)
        })
        .collect())
}

fn describe(
    device: &cpal::Device,
    default_name: Option<&str>,
    config: Option<cpal::SupportedStreamConfig>,
) -> Option<AudioDevice> {
    let name = device.name().ok()?;
    Some(AudioDevice {
        id: DeviceId(name.clone()),
        is_default: default_name == Some(name.as_str()),
        default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
        default_channels: config.as_ref().map(|c| c.channels()),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // Actual device availability depends on the system
        let _inputs = list_input_devices();
        let _outputs = list_output_devices();
    }

    #[test]
    fn test_device_id_from_str() {
        assert_eq!(DeviceId::from("Built-in Mic"), DeviceId("Built-in Mic".into()));
    }
}

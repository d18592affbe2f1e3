//! Capture device enumeration
//!
//! Devices are addressed by their position in the default host's device list,
//! which is also the id the operator picks from `enumerate_devices`.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// One capture-capable device on the default host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    /// Position in the host's full device list
    pub index: usize,
}

/// Whether `device` can be opened for input
fn is_capture_device(device: &cpal::Device) -> bool {
    device
        .supported_input_configs()
        .map(|mut configs| configs.next().is_some())
        .unwrap_or(false)
}

/// Capture devices on the default host, ordered by index.
///
/// Fails with [`AudioError::NoDevicesFound`] when nothing can record; the
/// error lists what the host did report so the operator can reconfigure.
pub fn enumerate_devices() -> Result<Vec<DeviceEntry>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let mut entries = Vec::new();
    let mut seen = Vec::new();

    for (index, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        if is_capture_device(&device) {
            entries.push(DeviceEntry { name, index });
        } else {
            seen.push(name);
        }
    }

    if entries.is_empty() {
        return Err(AudioError::NoDevicesFound {
            host: host.id().name().to_string(),
            seen,
        });
    }

    tracing::debug!("Found {} capture devices on {}", entries.len(), host.id().name());
    Ok(entries)
}

/// Device at `index` in the default host's list
pub fn device_by_index(index: usize) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let mut devices = host
        .devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;

    devices
        .nth(index)
        .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))
}

/// Device at `index`, checked to support capture
pub fn capture_device_by_index(index: usize) -> Result<cpal::Device, AudioError> {
    let device = device_by_index(index)?;
    if !is_capture_device(&device) {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        return Err(AudioError::DeviceNotFound(format!(
            "index {} ({}) has no input",
            index, name
        )));
    }
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_matches_lookup() {
        // Hosts without audio hardware report NoDevicesFound, which is fine
        match enumerate_devices() {
            Ok(entries) => {
                assert!(!entries.is_empty());
                assert!(entries.windows(2).all(|w| w[0].index < w[1].index));
                for entry in entries {
                    assert!(capture_device_by_index(entry.index).is_ok());
                }
            }
            Err(AudioError::NoDevicesFound { .. }) | Err(AudioError::CpalError(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_lookup_out_of_range() {
        assert!(device_by_index(usize::MAX).is_err());
    }

    #[test]
    fn test_no_devices_message() {
        let err = AudioError::NoDevicesFound {
            host: "ALSA".to_string(),
            seen: vec!["HDMI".to_string(), "Speakers".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No devices found on host ALSA; devices seen: [HDMI, Speakers]"
        );
    }
}

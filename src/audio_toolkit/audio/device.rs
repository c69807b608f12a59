use cpal::traits::{DeviceTrait, HostTrait};
use log::debug;

use crate::error::ClientError;

/// A named input device, paired with the cpal handle needed to open it.
pub struct CpalDeviceInfo {
    pub name: String,
    pub device: cpal::Device,
}

/// List all input devices on the default host.
pub fn list_input_devices() -> Result<Vec<CpalDeviceInfo>, ClientError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| map_backend_failure(&e.to_string()))?;

    Ok(devices
        .map(|device| {
            let name = device
                .name()
                .unwrap_or_else(|_| "<unknown device>".to_string());
            CpalDeviceInfo { name, device }
        })
        .collect())
}

/// Pick the named device, or the host default when no name is given.
pub(crate) fn select_input_device(name: Option<&str>) -> Result<cpal::Device, ClientError> {
    let host = cpal::default_host();

    match name {
        Some(wanted) => list_input_devices()?
            .into_iter()
            .find(|info| info.name == wanted)
            .map(|info| info.device)
            .ok_or(ClientError::DeviceNotFound),
        None => host
            .default_input_device()
            .ok_or(ClientError::DeviceNotFound),
    }
}

pub(crate) fn map_config_error(err: cpal::DefaultStreamConfigError) -> ClientError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => ClientError::DeviceNotFound,
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            ClientError::CaptureFailed("input stream type not supported".into())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err } => {
            map_backend_failure(&err.description)
        }
    }
}

pub(crate) fn map_build_error(err: cpal::BuildStreamError) -> ClientError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => ClientError::DeviceNotFound,
        cpal::BuildStreamError::BackendSpecific { err } => map_backend_failure(&err.description),
        other => ClientError::CaptureFailed(other.to_string()),
    }
}

/// Backend errors carry free-form text; permission failures on every
/// platform mention access or denial in it.
fn map_backend_failure(description: &str) -> ClientError {
    let lowered = description.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("access") {
        debug!("capture backend reported a permission failure: {description}");
        ClientError::PermissionDenied
    } else {
        ClientError::CaptureFailed(description.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_wording_maps_to_permission_denied() {
        assert!(matches!(
            map_backend_failure("Access denied by the OS"),
            ClientError::PermissionDenied
        ));
        assert!(matches!(
            map_backend_failure("microphone permission not granted"),
            ClientError::PermissionDenied
        ));
    }

    #[test]
    fn other_backend_failures_stay_capture_errors() {
        assert!(matches!(
            map_backend_failure("device wedged"),
            ClientError::CaptureFailed(_)
        ));
    }
}

//! Capability probe: does this machine expose a camera at all?

use crate::camera::{Camera, DeviceInfo};

/// Returns true iff at least one V4L2 video-capture device is present.
///
/// Only queries device capabilities; no stream is started and no format is
/// changed. Returns false rather than failing when nothing is found.
pub fn supports_capture() -> bool {
    !capture_devices().is_empty()
}

/// All devices that advertise video capture.
pub fn capture_devices() -> Vec<DeviceInfo> {
    let devices = Camera::list_devices();
    tracing::debug!(count = devices.len(), "probed capture devices");
    devices
}

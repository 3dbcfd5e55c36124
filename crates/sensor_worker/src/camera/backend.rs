//! Camera backend seam
//!
//! A backend delivers hardware-synchronised color + depth pairs. The
//! synthetic backend always ships; Intel RealSense devices need the
//! `realsense` cargo feature.

use std::time::Duration;

use contracts::{CameraSettings, ColorImage, DepthImage, DeviceDescriptor, DeviceError};

use super::synthetic::SyntheticCamera;

/// Descriptor prefix selecting a RealSense device
pub const REALSENSE_PREFIX: &str = "realsense";

/// One camera-reported frame pair
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub color: ColorImage,
    pub depth: DepthImage,
}

pub trait CameraBackend: Send {
    /// Start the sensor pipeline
    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self);

    /// Wait for the next pair; `Ok(None)` if none arrived within `timeout`
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<CameraFrame>, DeviceError>;
}

/// Serial number in a `realsense[:<serial>]` descriptor; empty selects the first device
pub fn realsense_serial(descriptor: &str) -> Option<&str> {
    match descriptor.strip_prefix(REALSENSE_PREFIX)? {
        "" => Some(""),
        rest => rest.strip_prefix(':'),
    }
}

/// Resolve a descriptor to a backend
pub fn open_backend(
    descriptor: &DeviceDescriptor,
    settings: &CameraSettings,
) -> Result<Box<dyn CameraBackend>, DeviceError> {
    if descriptor.synthetic_name().is_some() {
        return Ok(Box::new(SyntheticCamera::new(settings.clone())));
    }
    match realsense_serial(descriptor.as_str()) {
        Some(serial) => open_realsense(descriptor.as_str(), serial, settings),
        None => Err(DeviceError::not_found(descriptor.as_str())),
    }
}

#[cfg(feature = "realsense")]
fn open_realsense(
    descriptor: &str,
    serial: &str,
    settings: &CameraSettings,
) -> Result<Box<dyn CameraBackend>, DeviceError> {
    let camera = super::realsense::RealSenseCamera::open(descriptor, serial, settings)?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "realsense"))]
fn open_realsense(
    descriptor: &str,
    _serial: &str,
    _settings: &CameraSettings,
) -> Result<Box<dyn CameraBackend>, DeviceError> {
    Err(DeviceError::driver(
        descriptor,
        "built without RealSense support, rebuild with `--features realsense`",
    ))
}

//! Depth + color camera

mod backend;
#[cfg(feature = "realsense")]
mod realsense;
mod synthetic;
mod worker;

pub use backend::{open_backend, realsense_serial, CameraBackend, CameraFrame, REALSENSE_PREFIX};
#[cfg(feature = "realsense")]
pub use realsense::RealSenseCamera;
pub use synthetic::SyntheticCamera;
pub use worker::DepthColorWorker;

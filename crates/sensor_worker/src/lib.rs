//! # Sensor Worker
//!
//! Device side of the pipeline. Each worker runs in its own process, owns one
//! device exclusively and talks to the supervisor only through its pipes.
//!
//! - `RadarWorker`: TI mmWave point clouds over a serial port
//! - `DepthColorWorker`: paired color + depth frames from one camera
//! - `WorkerHost`: the process main loop around a worker
//!
//! Descriptors starting with `synthetic:` select built-in device simulators.

pub mod camera;
mod error;
mod host;
mod lock;
pub mod radar;
mod worker;

pub use camera::DepthColorWorker;
pub use error::{Result, WorkerError};
pub use host::WorkerHost;
pub use lock::DeviceLock;
pub use radar::RadarWorker;
pub use worker::SensorWorker;

use contracts::{SensorKind, TransportError, WorkerSettings};

/// Build the worker for `settings.sensor`
pub fn build_worker(settings: &WorkerSettings) -> Box<dyn SensorWorker> {
    let lock_dir = settings.lock_dir();
    match settings.sensor {
        SensorKind::Radar => Box::new(RadarWorker::new(settings.radar.clone(), lock_dir)),
        SensorKind::Camera => Box::new(DepthColorWorker::new(settings.camera.clone(), lock_dir)),
    }
}

/// Worker process entry: commands on stdin, events on stdout
pub async fn run_stdio(settings: WorkerSettings) -> std::result::Result<(), TransportError> {
    let host = WorkerHost::new(build_worker(&settings), &settings);
    host.run(tokio::io::stdin(), tokio::io::stdout()).await
}

//! SensorWorker trait
//!
//! A worker owns one device for the whole life of its process and turns
//! device-native data into `FrameEnvelope`s. All calls are blocking; the
//! host drives them from a dedicated thread.

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::{
    CaptureClock, DeviceDescriptor, DeviceError, FrameEnvelope, SensorKind, StateError, StreamKind,
    WorkerState,
};

use crate::error::Result;

pub trait SensorWorker: Send {
    fn sensor(&self) -> SensorKind;

    fn state(&self) -> WorkerState;

    /// Claim and open the device
    ///
    /// On failure the worker stays `Disconnected`.
    fn connect(&mut self, descriptor: &DeviceDescriptor, clock: CaptureClock) -> Result<()>;

    /// Begin producing frames; sequence numbers restart at 0
    fn start_streaming(&mut self) -> Result<()>;

    /// Stop producing frames and report how many were emitted per stream
    fn stop_streaming(&mut self) -> Result<BTreeMap<StreamKind, u64>>;

    /// Release the device; valid from every state, including `Error`
    fn disconnect(&mut self);

    /// Wait up to `timeout` for device data and append any complete frames to `out`
    ///
    /// A `DeviceError` moves the worker to `Error`.
    fn poll_frames(&mut self, timeout: Duration, out: &mut Vec<FrameEnvelope>) -> std::result::Result<(), DeviceError>;
}

/// Shared state guard used by both workers
pub(crate) fn require_state(
    current: WorkerState,
    expected: WorkerState,
    operation: &str,
    sensor: SensorKind,
) -> std::result::Result<(), StateError> {
    if current == expected {
        return Ok(());
    }
    match current {
        WorkerState::Disconnected | WorkerState::Connecting => {
            Err(StateError::NotConnected(sensor.to_string()))
        }
        other => Err(StateError::invalid_transition(other, operation)),
    }
}

/// Per-stream emitted counters for one streaming run
#[derive(Debug, Default, Clone)]
pub(crate) struct EmittedCounters(BTreeMap<StreamKind, u64>);

impl EmittedCounters {
    pub(crate) fn reset(&mut self, sensor: SensorKind) {
        self.0 = sensor.streams().iter().map(|&s| (s, 0)).collect();
    }

    pub(crate) fn record(&mut self, stream: StreamKind) {
        *self.0.entry(stream).or_default() += 1;
    }

    pub(crate) fn take(&mut self) -> BTreeMap<StreamKind, u64> {
        std::mem::take(&mut self.0)
    }
}

//! Messages exchanged between the supervisor and a worker process
//!
//! Commands flow supervisor → worker (worker stdin), events flow
//! worker → supervisor (worker stdout).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DeviceError, DeviceErrorKind, FrameEnvelope, StreamKind};

/// Opaque device address: serial port path, camera serial, or `synthetic:<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceDescriptor(String);

impl DeviceDescriptor {
    pub const SYNTHETIC_PREFIX: &'static str = "synthetic:";

    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name after `synthetic:`, if this descriptor selects a synthetic device
    pub fn synthetic_name(&self) -> Option<&str> {
        self.0.strip_prefix(Self::SYNTHETIC_PREFIX)
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic_name().is_some()
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceDescriptor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceDescriptor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Serializable summary of a [`DeviceError`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub kind: DeviceErrorKind,
    pub error: DeviceError,
}

impl From<DeviceError> for DeviceFailure {
    fn from(error: DeviceError) -> Self {
        Self {
            kind: error.kind(),
            error,
        }
    }
}

impl std::fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

/// Supervisor → worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCommand {
    Connect {
        descriptor: DeviceDescriptor,
        /// Supervisor epoch offset used to anchor the worker's capture clock
        clock_anchor_ns: u64,
    },
    StartStreaming,
    StopStreaming,
    Disconnect,
    /// Release everything and exit the worker main loop
    Shutdown,
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Connect { .. } => "connect",
            WorkerCommand::StartStreaming => "start_streaming",
            WorkerCommand::StopStreaming => "stop_streaming",
            WorkerCommand::Disconnect => "disconnect",
            WorkerCommand::Shutdown => "shutdown",
        }
    }
}

/// Worker → supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// Worker process is up and reading commands
    Ready { pid: u32 },
    Connected,
    ConnectFailed(DeviceFailure),
    StreamingStarted,
    /// Frames emitted per stream during the streaming run that just ended
    StreamingStopped { emitted: BTreeMap<StreamKind, u64> },
    Disconnected,
    Frame(FrameEnvelope),
    /// Unrecoverable device failure; the worker is now in `Error`
    Fault(DeviceFailure),
    /// Command not valid in the current state
    Rejected { command: String, reason: String },
}

impl WorkerEvent {
    /// Events that answer a command (everything except frames, faults and readiness)
    pub fn is_reply(&self) -> bool {
        !matches!(
            self,
            WorkerEvent::Frame(_) | WorkerEvent::Fault(_) | WorkerEvent::Ready { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_descriptor() {
        let d = DeviceDescriptor::new("synthetic:bench");
        assert_eq!(d.synthetic_name(), Some("bench"));
        assert!(!DeviceDescriptor::new("/dev/ttyACM1").is_synthetic());
    }

    #[test]
    fn test_failure_keeps_kind() {
        let failure = DeviceFailure::from(DeviceError::busy("COM3"));
        assert_eq!(failure.kind, DeviceErrorKind::Busy);
        assert_eq!(failure.to_string(), "device busy: COM3");
    }
}

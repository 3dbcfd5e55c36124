//! Supervisor 错误类型

use contracts::{ContractError, DeviceError, SensorKind, StateError, StreamKey, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to launch {sensor} worker: {message}")]
    Launch { sensor: SensorKind, message: String },

    #[error("{sensor} worker did not answer '{command}' within {timeout_ms}ms")]
    Timeout {
        sensor: SensorKind,
        command: &'static str,
        timeout_ms: u64,
    },

    #[error("{sensor} worker rejected '{command}': {reason}")]
    Rejected {
        sensor: SensorKind,
        command: String,
        reason: String,
    },

    #[error("sensor has no stream {0}")]
    UnknownStream(StreamKey),

    #[error("{sensor} worker answered '{command}' with {reply}")]
    UnexpectedReply {
        sensor: SensorKind,
        command: &'static str,
        reply: String,
    },
}

impl SupervisorError {
    pub fn launch(sensor: SensorKind, message: impl Into<String>) -> Self {
        Self::Launch {
            sensor,
            message: message.into(),
        }
    }
}

impl From<SupervisorError> for ContractError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::Device(e) => e.into(),
            SupervisorError::State(e) => e.into(),
            SupervisorError::Transport(e) => e.into(),
            other => ContractError::Other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

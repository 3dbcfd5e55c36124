//! Layered error definitions
//!
//! Categorized by where a failure is contained:
//! device / transport / encoding / protocol / state, plus configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::StreamKey;

// ===== Device Errors =====

/// Device-side failure kind (travels over the worker pipe)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceErrorKind {
    NotFound,
    Busy,
    Driver,
    Stalled,
}

/// Failure local to one sensor worker; never affects other sensors
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DeviceError {
    /// Descriptor does not resolve to a device
    #[error("device not found: {descriptor}")]
    NotFound { descriptor: String },

    /// Device exclusively held by another process
    #[error("device busy: {descriptor}")]
    Busy { descriptor: String },

    /// Driver or I/O fault
    #[error("driver error on '{descriptor}': {message}")]
    Driver { descriptor: String, message: String },

    /// Device stopped responding while streaming
    #[error("device '{descriptor}' stalled: no data for {silent_ms}ms")]
    Stalled { descriptor: String, silent_ms: u64 },
}

impl DeviceError {
    pub fn not_found(descriptor: impl Into<String>) -> Self {
        Self::NotFound {
            descriptor: descriptor.into(),
        }
    }

    pub fn busy(descriptor: impl Into<String>) -> Self {
        Self::Busy {
            descriptor: descriptor.into(),
        }
    }

    pub fn driver(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver {
            descriptor: descriptor.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> DeviceErrorKind {
        match self {
            Self::NotFound { .. } => DeviceErrorKind::NotFound,
            Self::Busy { .. } => DeviceErrorKind::Busy,
            Self::Driver { .. } => DeviceErrorKind::Driver,
            Self::Stalled { .. } => DeviceErrorKind::Stalled,
        }
    }
}

// ===== Transport Errors =====

/// Broken or misused channel between a worker and the consumer
#[derive(Debug, Error)]
pub enum TransportError {
    /// Producer side is gone (worker process died or closed its pipe)
    #[error("transport disconnected: {0}")]
    Disconnected(String),

    /// Consumer side has been closed
    #[error("transport closed")]
    Closed,

    /// Frame could not be encoded/decoded on the wire
    #[error("wire codec error: {0}")]
    Codec(String),

    /// IO error on the pipe
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected(reason.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Whether the peer is gone for good
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Closed)
    }
}

// ===== Encoding Errors =====

/// Failure fatal to the current recording session only
#[derive(Debug, Error)]
pub enum EncodingError {
    /// IO failure (includes disk full)
    #[error("io error in {encoder}: {source}")]
    Io {
        encoder: String,
        #[source]
        source: std::io::Error,
    },

    /// Frame dimensions differ from the ones the session started with
    #[error(
        "{encoder}: resolution changed from {expected_width}x{expected_height} to {width}x{height}"
    )]
    ResolutionChanged {
        encoder: String,
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    /// Payload the encoder cannot represent
    #[error("{encoder}: unsupported payload: {message}")]
    UnsupportedPayload { encoder: String, message: String },

    /// Failure reported by the underlying codec library or process
    #[error("{encoder}: {message}")]
    Encoder { encoder: String, message: String },

    /// Write attempted after close
    #[error("{encoder} is closed")]
    Closed { encoder: String },
}

impl EncodingError {
    pub fn io(encoder: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            encoder: encoder.into(),
            source,
        }
    }

    pub fn encoder(encoder: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encoder {
            encoder: encoder.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(encoder: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedPayload {
            encoder: encoder.into(),
            message: message.into(),
        }
    }
}

// ===== Protocol Errors =====

/// Malformed device frame; recoverable, the frame is dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("bad packet header: {0}")]
    BadHeader(String),

    #[error("packet truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad TLV type {tlv_type} at offset {offset}: {message}")]
    BadTlv {
        tlv_type: u32,
        offset: usize,
        message: String,
    },

    #[error("point count mismatch: header says {declared}, payload has {actual}")]
    PointCountMismatch { declared: usize, actual: usize },
}

// ===== State Errors =====

/// Caller mistake; rejected synchronously without any state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("a recording session is already active")]
    AlreadyActive,

    #[error("no recording session is active")]
    NotActive,

    #[error("sensor '{0}' is not connected")]
    NotConnected(String),

    #[error("sensor '{0}' is already attached")]
    AlreadyAttached(String),

    #[error("sensor '{0}' is not attached")]
    NotAttached(String),

    #[error("stream '{0}' already has a recording subscriber")]
    AlreadySubscribed(StreamKey),

    #[error("invalid transition from {from} on '{operation}'")]
    InvalidTransition { from: String, operation: String },
}

impl StateError {
    pub fn invalid_transition(from: impl std::fmt::Debug, operation: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: format!("{from:?}"),
            operation: operation.into(),
        }
    }
}

// ===== Unified Error =====

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Payload does not match its declared shape
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_kind() {
        assert_eq!(DeviceError::busy("COM3").kind(), DeviceErrorKind::Busy);
        assert_eq!(
            DeviceError::not_found("/dev/ttyX").to_string(),
            "device not found: /dev/ttyX"
        );
    }

    #[test]
    fn test_transport_disconnected() {
        assert!(TransportError::disconnected("eof").is_disconnected());
        assert!(!TransportError::codec("bad magic").is_disconnected());
    }

    #[test]
    fn test_resolution_changed_message() {
        let err = EncodingError::ResolutionChanged {
            encoder: "depth".into(),
            expected_width: 640,
            expected_height: 480,
            width: 1280,
            height: 720,
        };
        assert!(err.to_string().contains("640x480 to 1280x720"));
    }
}

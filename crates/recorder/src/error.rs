//! Recorder 错误类型

use std::path::PathBuf;
use std::sync::Arc;

use contracts::{ContractError, EncodingError, StateError, StreamKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("no streams requested")]
    NoStreams,

    #[error("cannot subscribe to {stream}: {source}")]
    Subscribe {
        stream: StreamKey,
        #[source]
        source: ContractError,
    },

    #[error("cannot open encoder for {stream}: {source}")]
    Open {
        stream: StreamKey,
        #[source]
        source: EncodingError,
    },

    #[error("session io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest error: {0}")]
    Manifest(String),

    /// An encoder failed; the session is `Failed`
    #[error("recording of {stream} failed: {source}")]
    StreamFailed {
        stream: StreamKey,
        #[source]
        source: Arc<EncodingError>,
    },
}

impl RecorderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;

//! Lifecycle state machines

use serde::{Deserialize, Serialize};

/// State of a sensor worker, as seen inside the worker process
///
/// `Disconnected → Connecting → Connected → Streaming → Connected → Disconnected`,
/// any state may fall into `Error`, from which only disconnect is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Error,
}

impl WorkerState {
    pub fn is_connected(self) -> bool {
        matches!(self, WorkerState::Connected | WorkerState::Streaming)
    }
}

/// State of a worker handle, as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Attached and idle
    Connected,
    Streaming,
    Error,
}

impl ConnectionState {
    /// Attached and able to deliver frames
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Streaming)
    }
}

impl From<WorkerState> for ConnectionState {
    fn from(state: WorkerState) -> Self {
        match state {
            WorkerState::Disconnected => ConnectionState::Disconnected,
            WorkerState::Connecting => ConnectionState::Connecting,
            WorkerState::Connected => ConnectionState::Connected,
            WorkerState::Streaming => ConnectionState::Streaming,
            WorkerState::Error => ConnectionState::Error,
        }
    }
}

/// Recording session state
///
/// `Idle → Active → Stopping → Closed`, `Failed` reachable from `Active` or `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    Stopping,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

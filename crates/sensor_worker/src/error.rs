//! Sensor worker 错误类型

use contracts::{DeviceError, StateError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// 设备故障，worker 进入 Error 或回到 Disconnected
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// 当前状态不接受该命令，状态不变
    #[error(transparent)]
    State(#[from] StateError),

    /// 与 supervisor 之间的管道断开
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

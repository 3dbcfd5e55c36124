//! # Supervisor
//!
//! 采集进程管理：每个传感器一个 worker（独立进程），
//! supervisor 通过管道下发命令、接收帧，并向显示与录制两条路径分发。
//!
//! ## 使用示例
//!
//! ```ignore
//! let mut supervisor = AcquisitionSupervisor::with_process_launcher(blueprint)?;
//! supervisor.attach(SensorKind::Radar, "/dev/ttyACM1".into()).await?;
//! if let Some(frame) = supervisor.poll(SensorKind::Radar)? {
//!     // 显示最新一帧
//! }
//! supervisor.shutdown().await;
//! ```

mod error;
mod handle;
mod launcher;
mod supervisor;

pub use error::{Result, SupervisorError};
pub use handle::{DetachReport, StreamStats, SupervisorEvent, WorkerInfo};
pub use launcher::{
    CommandPipe, EventPipe, InProcessLauncher, LaunchedWorker, ProcessLauncher, WorkerExit,
    WorkerLauncher,
};
pub use supervisor::{AcquisitionSupervisor, StreamingSummary};

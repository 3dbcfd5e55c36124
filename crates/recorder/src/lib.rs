//! # Recorder
//!
//! 录制会话：每个流一个消费任务，按序号写入对应的编码器。
//!
//! Session directory layout:
//! - `pointcloud.arrows`: Arrow IPC stream, one row per point
//! - `depth.zst` + `depth.frames.jsonl`: length-prefixed zstd frames
//! - `color.mp4` + `color.frames.jsonl`: H.264 via ffmpeg
//! - `session.json`: manifest, rewritten when the session ends

pub mod encoders;
mod error;
mod manifest;
mod recorder;
mod reorder;
mod session;

pub use error::{RecorderError, Result};
pub use manifest::{
    create_session_dir, read_manifest, session_dir_name, write_manifest, SessionFailure,
    SessionReport, StreamReport, MANIFEST_FILE,
};
pub use recorder::Recorder;
pub use reorder::{Ordered, ReorderBuffer, ReorderStats};
pub use session::{RecordingSession, StreamProgress};

//! # Transport
//!
//! Moves frames from a worker process to the consumer.
//!
//! - `codec`: length-prefixed bincode frames over the worker's stdin/stdout
//! - `queue`: bounded per-stream queues, drop-oldest for display and
//!   backpressure for recording
//! - `recording`: the blocking handle the recorder consumes
//!
//! Within one stream delivery order equals production order; nothing here
//! orders frames across streams.

mod codec;
mod queue;
mod recording;

pub use codec::{
    decode_body, decode_header, encode_frame, FrameReader, FrameWriter, HEADER_SIZE, MAGIC,
    MAX_BODY_LEN,
};
pub use queue::{FrameQueue, OverflowPolicy, QueueMetrics, QueueReceiver, QueueSender, QueueStats};
pub use recording::{RecordingReceiver, RecordingSource};

pub type Result<T> = std::result::Result<T, contracts::TransportError>;

//! Per-stream file encoders

mod color;
mod depth;
mod index;
mod pointcloud;
#[cfg(all(test, unix))]
pub(crate) mod testing;

use std::path::Path;

use contracts::{EncodingError, FrameEncoder, FrameEnvelope, RecorderConfig, StreamKind};

pub use color::{slot_of, ColorEncoder, COLOR_FILE, COLOR_INDEX_FILE};
pub use depth::{DepthEncoder, DepthHeader, DepthReader, DEPTH_FILE, DEPTH_INDEX_FILE, DEPTH_MAGIC};
pub use index::{read_index, FrameIndex, IndexEntry};
pub use pointcloud::{
    pointcloud_schema, read_pointcloud, PointCloudEncoder, PointCloudReader, RecordedPointCloud,
    POINTCLOUD_FILE,
};

/// Output file name for a stream inside a session directory
pub fn file_name(stream: StreamKind) -> &'static str {
    match stream {
        StreamKind::PointCloud => POINTCLOUD_FILE,
        StreamKind::Depth => DEPTH_FILE,
        StreamKind::Color => COLOR_FILE,
    }
}

/// The encoder matching one stream kind
pub enum StreamEncoder {
    PointCloud(PointCloudEncoder),
    Depth(DepthEncoder),
    Color(ColorEncoder),
}

impl StreamEncoder {
    pub fn open(stream: StreamKind, dir: &Path, config: &RecorderConfig) -> Result<Self, EncodingError> {
        Ok(match stream {
            StreamKind::PointCloud => {
                StreamEncoder::PointCloud(PointCloudEncoder::create(dir, &config.pointcloud)?)
            }
            StreamKind::Depth => StreamEncoder::Depth(DepthEncoder::create(dir, &config.depth)?),
            StreamKind::Color => StreamEncoder::Color(ColorEncoder::create(dir, &config.color)?),
        })
    }
}

impl FrameEncoder for StreamEncoder {
    fn name(&self) -> &str {
        match self {
            StreamEncoder::PointCloud(e) => e.name(),
            StreamEncoder::Depth(e) => e.name(),
            StreamEncoder::Color(e) => e.name(),
        }
    }

    async fn write(&mut self, frame: &FrameEnvelope) -> Result<(), EncodingError> {
        match self {
            StreamEncoder::PointCloud(e) => e.write(frame).await,
            StreamEncoder::Depth(e) => e.write(frame).await,
            StreamEncoder::Color(e) => e.write(frame).await,
        }
    }

    async fn flush(&mut self) -> Result<(), EncodingError> {
        match self {
            StreamEncoder::PointCloud(e) => e.flush().await,
            StreamEncoder::Depth(e) => e.flush().await,
            StreamEncoder::Color(e) => e.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), EncodingError> {
        match self {
            StreamEncoder::PointCloud(e) => e.close().await,
            StreamEncoder::Depth(e) => e.close().await,
            StreamEncoder::Color(e) => e.close().await,
        }
    }

    fn frames_written(&self) -> u64 {
        match self {
            StreamEncoder::PointCloud(e) => e.frames_written(),
            StreamEncoder::Depth(e) => e.frames_written(),
            StreamEncoder::Color(e) => e.frames_written(),
        }
    }
}

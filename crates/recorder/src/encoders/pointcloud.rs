//! Point cloud → Arrow IPC stream (`pointcloud.arrows`)
//!
//! One row per point. A frame without detections still gets a single row with
//! null point columns so every recorded frame is visible in the file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::builder::{Float32Builder, UInt64Builder};
use arrow_array::{Array, ArrayRef, Float32Array, RecordBatch, UInt64Array};
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use contracts::{
    EncodingError, FrameEncoder, FrameEnvelope, FramePayload, PointCloudEncoderConfig, RadarPoint,
};
use tracing::debug;

pub const POINTCLOUD_FILE: &str = "pointcloud.arrows";

const NAME: &str = "pointcloud";

const POINT_COLUMNS: [&str; 8] = [
    "x", "y", "z", "range", "azim_deg", "elev_deg", "velocity", "intensity",
];

pub fn pointcloud_schema() -> SchemaRef {
    let mut fields = vec![
        Field::new("frame_num", DataType::UInt64, false),
        Field::new("capture_time_ns", DataType::UInt64, false),
    ];
    fields.extend(
        POINT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float32, true)),
    );
    Arc::new(Schema::new(fields))
}

fn arrow_err(e: ArrowError) -> EncodingError {
    EncodingError::encoder(NAME, e.to_string())
}

/// Column builders for the batch being assembled
struct BatchBuilder {
    frame_num: UInt64Builder,
    capture_time: UInt64Builder,
    points: [Float32Builder; 8],
    frames: usize,
}

impl BatchBuilder {
    fn new() -> Self {
        Self {
            frame_num: UInt64Builder::new(),
            capture_time: UInt64Builder::new(),
            points: std::array::from_fn(|_| Float32Builder::new()),
            frames: 0,
        }
    }

    fn push_frame(&mut self, sequence: u64, capture_time_ns: u64, points: &[RadarPoint]) {
        self.frames += 1;
        if points.is_empty() {
            self.frame_num.append_value(sequence);
            self.capture_time.append_value(capture_time_ns);
            for column in &mut self.points {
                column.append_null();
            }
            return;
        }
        for point in points {
            self.frame_num.append_value(sequence);
            self.capture_time.append_value(capture_time_ns);
            let values = [
                Some(point.x),
                Some(point.y),
                Some(point.z),
                Some(point.range()),
                Some(point.azimuth_deg()),
                Some(point.elevation_deg()),
                point.velocity,
                point.intensity,
            ];
            for (column, value) in self.points.iter_mut().zip(values) {
                column.append_option(value);
            }
        }
    }

    fn finish(&mut self, schema: &SchemaRef) -> Result<RecordBatch, ArrowError> {
        self.frames = 0;
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(self.frame_num.finish()),
            Arc::new(self.capture_time.finish()),
        ];
        columns.extend(
            self.points
                .iter_mut()
                .map(|column| Arc::new(column.finish()) as ArrayRef),
        );
        RecordBatch::try_new(schema.clone(), columns)
    }
}

pub struct PointCloudEncoder {
    path: PathBuf,
    schema: SchemaRef,
    writer: Option<StreamWriter<BufWriter<File>>>,
    batch: BatchBuilder,
    batch_frames: usize,
    frames_written: u64,
}

impl PointCloudEncoder {
    pub fn create(dir: &Path, config: &PointCloudEncoderConfig) -> Result<Self, EncodingError> {
        let path = dir.join(POINTCLOUD_FILE);
        let schema = pointcloud_schema();
        let file = File::create(&path).map_err(|e| EncodingError::io(NAME, e))?;
        let writer = StreamWriter::try_new(BufWriter::new(file), &schema).map_err(arrow_err)?;
        Ok(Self {
            path,
            schema,
            writer: Some(writer),
            batch: BatchBuilder::new(),
            batch_frames: config.batch_frames.max(1),
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_pending(&mut self) -> Result<(), EncodingError> {
        if self.batch.frames == 0 {
            return Ok(());
        }
        let writer = self.writer.as_mut().ok_or_else(|| EncodingError::Closed {
            encoder: NAME.to_string(),
        })?;
        let batch = self.batch.finish(&self.schema).map_err(arrow_err)?;
        writer.write(&batch).map_err(arrow_err)?;
        // 每个 batch 立即落盘
        writer
            .get_mut()
            .flush()
            .map_err(|e| EncodingError::io(NAME, e))?;
        debug!(rows = batch.num_rows(), "pointcloud batch written");
        Ok(())
    }
}

impl FrameEncoder for PointCloudEncoder {
    fn name(&self) -> &str {
        NAME
    }

    async fn write(&mut self, frame: &FrameEnvelope) -> Result<(), EncodingError> {
        if self.writer.is_none() {
            return Err(EncodingError::Closed {
                encoder: NAME.to_string(),
            });
        }
        let FramePayload::PointCloud(cloud) = &frame.payload else {
            return Err(EncodingError::unsupported(
                NAME,
                format!("expected point cloud, got {}", frame.stream),
            ));
        };
        self.batch
            .push_frame(frame.sequence, frame.capture_time.as_nanos(), &cloud.points);
        self.frames_written += 1;
        if self.batch.frames >= self.batch_frames {
            self.write_pending()?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), EncodingError> {
        self.write_pending()
    }

    async fn close(&mut self) -> Result<(), EncodingError> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.write_pending()?;
        if let Some(mut writer) = self.writer.take() {
            writer.finish().map_err(arrow_err)?;
            let mut inner = writer.into_inner().map_err(arrow_err)?;
            inner.flush().map_err(|e| EncodingError::io(NAME, e))?;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

/// One frame read back from `pointcloud.arrows`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPointCloud {
    pub frame_num: u64,
    pub capture_time_ns: u64,
    pub points: Vec<RadarPoint>,
}

/// Reads `pointcloud.arrows` back into frames
pub struct PointCloudReader {
    reader: StreamReader<BufReader<File>>,
}

impl PointCloudReader {
    pub fn open(path: &Path) -> Result<Self, EncodingError> {
        let file = File::open(path).map_err(|e| EncodingError::io(NAME, e))?;
        let reader = StreamReader::try_new(BufReader::new(file), None).map_err(arrow_err)?;
        Ok(Self { reader })
    }

    /// Read every remaining batch, grouping rows by `frame_num`
    pub fn read_frames(self) -> Result<Vec<RecordedPointCloud>, EncodingError> {
        let mut frames: Vec<RecordedPointCloud> = Vec::new();
        for batch in self.reader {
            let batch = batch.map_err(arrow_err)?;
            append_batch(&batch, &mut frames)?;
        }
        Ok(frames)
    }
}

fn append_batch(batch: &RecordBatch, frames: &mut Vec<RecordedPointCloud>) -> Result<(), EncodingError> {
    let frame_num = u64_column(batch, 0)?;
    let capture_time = u64_column(batch, 1)?;
    let mut columns = Vec::with_capacity(POINT_COLUMNS.len());
    for i in 0..POINT_COLUMNS.len() {
        columns.push(f32_column(batch, i + 2)?);
    }

    for row in 0..batch.num_rows() {
        let sequence = frame_num.value(row);
        if frames.last().map(|f| f.frame_num) != Some(sequence) {
            frames.push(RecordedPointCloud {
                frame_num: sequence,
                capture_time_ns: capture_time.value(row),
                points: Vec::new(),
            });
        }
        // null x marks an empty frame
        if columns[0].is_null(row) {
            continue;
        }
        let value = |col: usize| (!columns[col].is_null(row)).then(|| columns[col].value(row));
        let point = RadarPoint {
            x: columns[0].value(row),
            y: columns[1].value(row),
            z: columns[2].value(row),
            velocity: value(6),
            intensity: value(7),
        };
        if let Some(frame) = frames.last_mut() {
            frame.points.push(point);
        }
    }
    Ok(())
}

/// Read a whole point cloud recording
pub fn read_pointcloud(path: &Path) -> Result<Vec<RecordedPointCloud>, EncodingError> {
    PointCloudReader::open(path)?.read_frames()
}

fn u64_column(batch: &RecordBatch, index: usize) -> Result<&UInt64Array, EncodingError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| EncodingError::encoder(NAME, format!("column {index} is not u64")))
}

fn f32_column(batch: &RecordBatch, index: usize) -> Result<&Float32Array, EncodingError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| EncodingError::encoder(NAME, format!("column {index} is not f32")))
}

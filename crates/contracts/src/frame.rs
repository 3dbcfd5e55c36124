//! FrameEnvelope - 贯穿整条管线的数据单元
//!
//! One sensor reading plus the metadata needed for ordering and drop detection.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ContractError, SensorKind, StreamKey, StreamKind};

/// Monotonic capture timestamp in nanoseconds on the supervisor epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CaptureTime(pub u64);

impl CaptureTime {
    pub const ZERO: CaptureTime = CaptureTime(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Saturating difference `self - earlier`
    pub fn saturating_sub(self, earlier: CaptureTime) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for CaptureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

// ===== Point cloud =====

/// One radar detection in sensor coordinates (metres)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RadarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Radial velocity (m/s)
    pub velocity: Option<f32>,
    /// Signal strength (dB)
    pub intensity: Option<f32>,
}

impl RadarPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            velocity: None,
            intensity: None,
        }
    }

    /// Build from spherical coordinates.
    ///
    /// Azimuth is positive to the left of boresight, so `y` is negated.
    pub fn from_spherical(range: f32, azimuth_deg: f32, elevation_deg: f32) -> Self {
        let az = azimuth_deg.to_radians();
        let el = elevation_deg.to_radians();
        Self::new(
            range * el.cos() * az.cos(),
            -range * el.cos() * az.sin(),
            range * el.sin(),
        )
    }

    pub fn range(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn azimuth_deg(&self) -> f32 {
        (-self.y).atan2(self.x).to_degrees()
    }

    pub fn elevation_deg(&self) -> f32 {
        let horizontal = (self.x * self.x + self.y * self.y).sqrt();
        self.z.atan2(horizontal).to_degrees()
    }
}

/// One radar frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloudFrame {
    pub points: Vec<RadarPoint>,
}

impl PointCloudFrame {
    pub fn new(points: Vec<RadarPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ===== Images =====

/// Color pixel format (8 bits per channel, packed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Bgr8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }

    /// ffmpeg `-pix_fmt` name
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Bgr8 => "bgr24",
            PixelFormat::Rgb8 => "rgb24",
        }
    }
}

/// A single color image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl ColorImage {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, ContractError> {
        let image = Self {
            width,
            height,
            format,
            data: data.into(),
        };
        image.validate()?;
        Ok(image)
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        validate_image(self.width, self.height, self.expected_len(), self.data.len())
    }
}

/// Per-pixel distance encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    /// Little-endian u16 units, multiplied by `scale` to obtain metres
    U16,
    /// Little-endian f32 units, multiplied by `scale` to obtain metres
    F32,
}

impl DepthFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            DepthFormat::U16 => 2,
            DepthFormat::F32 => 4,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DepthFormat::U16 => 1,
            DepthFormat::F32 => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DepthFormat::U16),
            2 => Some(DepthFormat::F32),
            _ => None,
        }
    }
}

/// A single depth image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    pub format: DepthFormat,
    /// Metres per unit
    pub scale: f32,
    pub data: Bytes,
}

impl DepthImage {
    pub fn new(
        width: u32,
        height: u32,
        format: DepthFormat,
        scale: f32,
        data: impl Into<Bytes>,
    ) -> Result<Self, ContractError> {
        let image = Self {
            width,
            height,
            format,
            scale,
            data: data.into(),
        };
        image.validate()?;
        Ok(image)
    }

    /// Build a U16 depth image from unit values
    pub fn from_u16(width: u32, height: u32, scale: f32, values: &[u16]) -> Result<Self, ContractError> {
        let mut data = Vec::with_capacity(values.len() * 2);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(width, height, DepthFormat::U16, scale, data)
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ContractError::invalid_payload(format!(
                "depth scale must be positive, got {}",
                self.scale
            )));
        }
        validate_image(self.width, self.height, self.expected_len(), self.data.len())
    }

    /// Distance in metres at (col, row)
    pub fn distance_m(&self, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = (row as usize * self.width as usize + col as usize) * bpp;
        let raw = self.data.get(offset..offset + bpp)?;
        let units = match self.format {
            DepthFormat::U16 => u16::from_le_bytes([raw[0], raw[1]]) as f32,
            DepthFormat::F32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
        };
        Some(units * self.scale)
    }
}

fn validate_image(width: u32, height: u32, expected: usize, actual: usize) -> Result<(), ContractError> {
    if width == 0 || height == 0 {
        return Err(ContractError::invalid_payload(format!(
            "image dimensions must be non-zero, got {width}x{height}"
        )));
    }
    if expected != actual {
        return Err(ContractError::invalid_payload(format!(
            "{width}x{height} image needs {expected} bytes, got {actual}"
        )));
    }
    Ok(())
}

// ===== Envelope =====

/// Stream-specific payload (closed set)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FramePayload {
    PointCloud(PointCloudFrame),
    Color(ColorImage),
    Depth(DepthImage),
}

impl FramePayload {
    pub fn stream_kind(&self) -> StreamKind {
        match self {
            FramePayload::PointCloud(_) => StreamKind::PointCloud,
            FramePayload::Color(_) => StreamKind::Color,
            FramePayload::Depth(_) => StreamKind::Depth,
        }
    }

    /// Image dimensions, `None` for point clouds
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            FramePayload::PointCloud(_) => None,
            FramePayload::Color(img) => Some((img.width, img.height)),
            FramePayload::Depth(img) => Some((img.width, img.height)),
        }
    }

    /// Approximate payload size in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            FramePayload::PointCloud(pc) => pc.points.len() * std::mem::size_of::<RadarPoint>(),
            FramePayload::Color(img) => img.data.len(),
            FramePayload::Depth(img) => img.data.len(),
        }
    }
}

/// Tagged sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEnvelope {
    pub sensor: SensorKind,
    pub stream: StreamKind,
    /// Assigned when the worker obtained the frame from the device
    pub capture_time: CaptureTime,
    /// Per-stream counter, starts at 0 each time streaming starts
    pub sequence: u64,
    pub payload: FramePayload,
}

impl FrameEnvelope {
    /// Build an envelope; the stream kind is derived from the payload
    pub fn new(
        sensor: SensorKind,
        capture_time: CaptureTime,
        sequence: u64,
        payload: FramePayload,
    ) -> Result<Self, ContractError> {
        let stream = payload.stream_kind();
        StreamKey::new(sensor, stream)?;
        Ok(Self {
            sensor,
            stream,
            capture_time,
            sequence,
            payload,
        })
    }

    pub fn key(&self) -> StreamKey {
        StreamKey {
            sensor: self.sensor,
            stream: self.stream,
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.payload.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_derives_stream_kind() {
        let env = FrameEnvelope::new(
            SensorKind::Radar,
            CaptureTime(10),
            0,
            FramePayload::PointCloud(PointCloudFrame::default()),
        )
        .unwrap();
        assert_eq!(env.key(), StreamKey::RADAR_POINTCLOUD);

        let mismatched = FrameEnvelope::new(
            SensorKind::Radar,
            CaptureTime(10),
            0,
            FramePayload::Depth(DepthImage::from_u16(1, 1, 0.001, &[5]).unwrap()),
        );
        assert!(mismatched.is_err());
    }

    #[test]
    fn test_image_length_validated() {
        assert!(ColorImage::new(2, 2, PixelFormat::Bgr8, vec![0u8; 12]).is_ok());
        assert!(ColorImage::new(2, 2, PixelFormat::Bgr8, vec![0u8; 11]).is_err());
        assert!(ColorImage::new(0, 2, PixelFormat::Bgr8, Vec::<u8>::new()).is_err());
        assert!(DepthImage::new(2, 2, DepthFormat::U16, 0.0, vec![0u8; 8]).is_err());
    }

    #[test]
    fn test_depth_distance() {
        let img = DepthImage::from_u16(2, 1, 0.001, &[1000, 2500]).unwrap();
        assert_eq!(img.distance_m(0, 0), Some(1.0));
        assert_eq!(img.distance_m(1, 0), Some(2.5));
        assert_eq!(img.distance_m(2, 0), None);
    }

    #[test]
    fn test_spherical_round_trip() {
        let p = RadarPoint::from_spherical(10.0, 30.0, 5.0);
        assert!((p.range() - 10.0).abs() < 1e-4);
        assert!((p.azimuth_deg() - 30.0).abs() < 1e-3);
        assert!((p.elevation_deg() - 5.0).abs() < 1e-3);
        // positive azimuth points to negative y
        assert!(p.y < 0.0);
    }
}

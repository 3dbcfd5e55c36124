//! Sensor and stream identifiers
//!
//! The set of sensors and the streams they emit is closed: a radar produces a
//! point cloud, a depth/color camera produces paired color and depth images.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Physical sensor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// mmWave radar over a serial link
    Radar,
    /// Depth + color camera
    Camera,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Radar, SensorKind::Camera];

    /// Streams emitted by this sensor
    pub fn streams(self) -> &'static [StreamKind] {
        match self {
            SensorKind::Radar => &[StreamKind::PointCloud],
            SensorKind::Camera => &[StreamKind::Color, StreamKind::Depth],
        }
    }

    /// Stream shown by the display path when only the sensor is named
    pub fn primary_stream(self) -> StreamKind {
        match self {
            SensorKind::Radar => StreamKind::PointCloud,
            SensorKind::Camera => StreamKind::Color,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Radar => "radar",
            SensorKind::Camera => "camera",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "radar" => Ok(SensorKind::Radar),
            "camera" => Ok(SensorKind::Camera),
            other => Err(ContractError::Other(format!("unknown sensor kind '{other}'"))),
        }
    }
}

/// Kind of data carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    PointCloud,
    Color,
    Depth,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::PointCloud => "pointcloud",
            StreamKind::Color => "color",
            StreamKind::Depth => "depth",
        }
    }

    /// The sensor that owns this stream
    pub fn sensor(self) -> SensorKind {
        match self {
            StreamKind::PointCloud => SensorKind::Radar,
            StreamKind::Color | StreamKind::Depth => SensorKind::Camera,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single (sensor, stream) pair
///
/// Only the three combinations listed by [`StreamKey::ALL`] are constructible
/// through [`StreamKey::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub sensor: SensorKind,
    pub stream: StreamKind,
}

impl StreamKey {
    pub const RADAR_POINTCLOUD: StreamKey = StreamKey {
        sensor: SensorKind::Radar,
        stream: StreamKind::PointCloud,
    };
    pub const CAMERA_COLOR: StreamKey = StreamKey {
        sensor: SensorKind::Camera,
        stream: StreamKind::Color,
    };
    pub const CAMERA_DEPTH: StreamKey = StreamKey {
        sensor: SensorKind::Camera,
        stream: StreamKind::Depth,
    };

    pub const ALL: [StreamKey; 3] = [
        StreamKey::RADAR_POINTCLOUD,
        StreamKey::CAMERA_COLOR,
        StreamKey::CAMERA_DEPTH,
    ];

    /// Build a key, rejecting streams the sensor does not emit
    pub fn new(sensor: SensorKind, stream: StreamKind) -> Result<Self, ContractError> {
        if stream.sensor() != sensor {
            return Err(ContractError::Other(format!(
                "sensor '{sensor}' does not emit '{stream}' frames"
            )));
        }
        Ok(Self { sensor, stream })
    }

    /// All stream keys of one sensor
    pub fn for_sensor(sensor: SensorKind) -> impl Iterator<Item = StreamKey> {
        sensor
            .streams()
            .iter()
            .map(move |&stream| StreamKey { sensor, stream })
    }
}

impl From<StreamKind> for StreamKey {
    fn from(stream: StreamKind) -> Self {
        StreamKey {
            sensor: stream.sensor(),
            stream,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sensor, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_rejects_foreign_stream() {
        assert!(StreamKey::new(SensorKind::Radar, StreamKind::Color).is_err());
        assert!(StreamKey::new(SensorKind::Camera, StreamKind::PointCloud).is_err());
        assert_eq!(
            StreamKey::new(SensorKind::Camera, StreamKind::Depth).unwrap(),
            StreamKey::CAMERA_DEPTH
        );
    }

    #[test]
    fn test_camera_emits_two_streams() {
        let keys: Vec<_> = StreamKey::for_sensor(SensorKind::Camera).collect();
        assert_eq!(keys, vec![StreamKey::CAMERA_COLOR, StreamKey::CAMERA_DEPTH]);
        assert_eq!(SensorKind::Camera.primary_stream(), StreamKind::Color);
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(StreamKey::RADAR_POINTCLOUD.to_string(), "radar/pointcloud");
        assert_eq!("Radar".parse::<SensorKind>().unwrap(), SensorKind::Radar);
        assert!("lidar".parse::<SensorKind>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&StreamKind::PointCloud).unwrap();
        assert_eq!(json, "\"point_cloud\"");
    }
}

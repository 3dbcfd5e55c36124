//! RigBlueprint - Config Loader 输出
//!
//! 描述完整的采集台配置：传感器、传输容量、进程管理、录制与可观测性。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{DeviceDescriptor, SensorKind, StreamKind};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的采集台配置蓝图
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 传感器列表（每种传感器至多一个）
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl RigBlueprint {
    pub fn sensor(&self, kind: SensorKind) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.sensor == kind)
    }

    /// Settings handed to the worker process of one sensor
    pub fn worker_settings(&self, sensor: &SensorConfig) -> WorkerSettings {
        WorkerSettings {
            sensor: sensor.sensor,
            radar: sensor.radar.clone().unwrap_or_default(),
            camera: sensor.camera.clone().unwrap_or_default(),
            event_capacity: self.transport.pipe_capacity,
            poll_interval_ms: self.supervisor.poll_interval_ms,
            device_lock_dir: self.supervisor.device_lock_dir.clone(),
        }
    }

    /// Recorder settings for this rig; an unset color rate follows the camera
    pub fn recorder_config(&self) -> RecorderConfig {
        let mut config = self.recorder.clone();
        if config.color.fps.is_none() {
            config.color.fps = self
                .sensor(SensorKind::Camera)
                .map(|camera| camera.camera.clone().unwrap_or_default().fps);
        }
        config
    }
}

/// 传感器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// 传感器类型
    pub sensor: SensorKind,

    /// 设备描述符：串口路径、相机序列号或 `synthetic:<name>`
    pub device: DeviceDescriptor,

    /// 雷达参数（仅 radar）
    #[serde(default)]
    pub radar: Option<RadarSettings>,

    /// 相机参数（仅 camera）
    #[serde(default)]
    pub camera: Option<CameraSettings>,
}

/// 雷达参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarSettings {
    /// 数据口波特率
    pub baud_rate: u32,
    /// 单次串口读超时
    pub read_timeout_ms: u64,
    /// 持续无完整数据包即判定设备失联
    pub stall_timeout_ms: u64,
    /// 合成雷达：帧间隔
    pub synthetic_frame_interval_ms: u64,
    /// 合成雷达：每帧点数
    pub synthetic_points: usize,
    /// 合成雷达：在链路上损坏的设备帧号
    pub synthetic_corrupt_frames: Vec<u64>,
    /// 合成雷达：产生的帧数上限
    pub synthetic_frame_limit: Option<u64>,
}

impl Default for RadarSettings {
    fn default() -> Self {
        Self {
            baud_rate: 921_600,
            read_timeout_ms: 100,
            stall_timeout_ms: 2_000,
            synthetic_frame_interval_ms: 50,
            synthetic_points: 32,
            synthetic_corrupt_frames: Vec::new(),
            synthetic_frame_limit: None,
        }
    }
}

impl RadarSettings {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

/// 相机参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// 深度单位对应的米数
    pub depth_scale: f32,
    /// 单帧等待超时，超过 `stall_timeout_ms` 视为设备失联
    pub stall_timeout_ms: u64,
    /// 合成相机：产生的帧对上限
    pub synthetic_frame_limit: Option<u64>,
    /// 合成相机：在第 N 帧后切换分辨率
    pub synthetic_resolution_change: Option<ResolutionChange>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            depth_scale: 0.001,
            stall_timeout_ms: 2_000,
            synthetic_frame_limit: None,
            synthetic_resolution_change: None,
        }
    }
}

impl CameraSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionChange {
    pub after_frames: u64,
    pub width: u32,
    pub height: u32,
}

/// Everything a worker process needs, passed as JSON on its command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub sensor: SensorKind,
    #[serde(default)]
    pub radar: RadarSettings,
    #[serde(default)]
    pub camera: CameraSettings,
    /// Events buffered between the acquisition thread and the pipe writer
    #[serde(default = "default_pipe_capacity")]
    pub event_capacity: usize,
    /// Device poll slice; commands are observed between slices
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Directory for cross-process device lock files
    #[serde(default)]
    pub device_lock_dir: Option<PathBuf>,
}

impl WorkerSettings {
    pub fn new(sensor: SensorKind) -> Self {
        Self {
            sensor,
            radar: RadarSettings::default(),
            camera: CameraSettings::default(),
            event_capacity: default_pipe_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            device_lock_dir: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Lock directory, defaulting to the system temp dir
    pub fn lock_dir(&self) -> PathBuf {
        self.device_lock_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("fusion-recorder-locks"))
    }
}

/// 传输队列容量
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// 显示路径（drop-oldest）容量
    pub pointcloud_capacity: usize,
    pub color_capacity: usize,
    pub depth_capacity: usize,
    /// 录制路径（背压）容量
    pub recording_capacity: usize,
    /// 进程管道事件缓冲
    pub pipe_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pointcloud_capacity: 16,
            color_capacity: 4,
            depth_capacity: 4,
            recording_capacity: 64,
            pipe_capacity: default_pipe_capacity(),
        }
    }
}

impl TransportConfig {
    pub fn display_capacity(&self, stream: StreamKind) -> usize {
        match stream {
            StreamKind::PointCloud => self.pointcloud_capacity,
            StreamKind::Color => self.color_capacity,
            StreamKind::Depth => self.depth_capacity,
        }
    }
}

fn default_pipe_capacity() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    20
}

/// 进程管理参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// 等待 worker 应答（含 connect）的超时
    pub connect_timeout_ms: u64,
    /// detach 时等待 worker 自行退出的宽限期
    pub stop_grace_ms: u64,
    /// attach 成功后立即开始推流
    pub autostart_streaming: bool,
    /// worker 可执行文件，缺省为当前可执行文件
    pub worker_program: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub device_lock_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            stop_grace_ms: 3_000,
            autostart_streaming: true,
            worker_program: None,
            poll_interval_ms: default_poll_interval_ms(),
            device_lock_dir: None,
        }
    }
}

impl SupervisorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// 录制参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub output_root: PathBuf,
    /// 乱序容忍窗口（帧）
    pub reorder_window: usize,
    /// stop 时等待各流写完的上限，超时后强制关闭编码器
    pub stop_grace_ms: u64,
    pub pointcloud: PointCloudEncoderConfig,
    pub depth: DepthEncoderConfig,
    pub color: ColorEncoderConfig,
}

impl RecorderConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("recordings"),
            reorder_window: 4,
            stop_grace_ms: 10_000,
            pointcloud: PointCloudEncoderConfig::default(),
            depth: DepthEncoderConfig::default(),
            color: ColorEncoderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudEncoderConfig {
    /// 内存中缓存的最大帧数，达到即写出一个 record batch
    pub batch_frames: usize,
}

impl Default for PointCloudEncoderConfig {
    fn default() -> Self {
        Self { batch_frames: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthEncoderConfig {
    /// zstd 压缩等级
    pub compression_level: i32,
}

impl Default for DepthEncoderConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorEncoderConfig {
    pub ffmpeg_path: PathBuf,
    /// 视频帧率；未设置时跟随相机的 `fps`
    pub fps: Option<u32>,
    pub crf: u8,
    pub preset: String,
    pub codec: String,
}

impl ColorEncoderConfig {
    pub const DEFAULT_FPS: u32 = 30;

    pub fn fps_or_default(&self) -> u32 {
        self.fps.unwrap_or(Self::DEFAULT_FPS).max(1)
    }
}

impl Default for ColorEncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            fps: None,
            crf: 18,
            preset: "fast".to_string(),
            codec: "libx264".to_string(),
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 端口，0 表示关闭
    pub metrics_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_settings_from_blueprint() {
        let blueprint = RigBlueprint {
            sensors: vec![SensorConfig {
                sensor: SensorKind::Radar,
                device: DeviceDescriptor::new("synthetic:r"),
                radar: Some(RadarSettings {
                    synthetic_points: 4,
                    ..RadarSettings::default()
                }),
                camera: None,
            }],
            ..RigBlueprint::default()
        };
        let sensor = blueprint.sensor(SensorKind::Radar).unwrap();
        let settings = blueprint.worker_settings(sensor);
        assert_eq!(settings.radar.synthetic_points, 4);
        assert_eq!(settings.camera, CameraSettings::default());
        assert_eq!(settings.event_capacity, 64);
        assert!(blueprint.sensor(SensorKind::Camera).is_none());
    }

    #[test]
    fn test_display_capacity_per_stream() {
        let transport = TransportConfig::default();
        assert_eq!(transport.display_capacity(StreamKind::PointCloud), 16);
        assert_eq!(transport.display_capacity(StreamKind::Depth), 4);
    }

    #[test]
    fn test_worker_settings_json_defaults() {
        let settings: WorkerSettings = serde_json::from_str(r#"{"sensor":"camera"}"#).unwrap();
        assert_eq!(settings.sensor, SensorKind::Camera);
        assert_eq!(settings.camera.width, 640);
        assert_eq!(settings.poll_interval_ms, 20);
    }

    #[test]
    fn test_color_rate_follows_camera() {
        let camera = |fps| SensorConfig {
            sensor: SensorKind::Camera,
            device: DeviceDescriptor::new("synthetic:cam"),
            radar: None,
            camera: Some(CameraSettings {
                fps,
                ..CameraSettings::default()
            }),
        };
        let mut blueprint = RigBlueprint {
            sensors: vec![camera(60)],
            ..RigBlueprint::default()
        };
        assert_eq!(blueprint.recorder.color.fps, None);
        assert_eq!(blueprint.recorder_config().color.fps, Some(60));

        // an explicit rate wins
        blueprint.recorder.color.fps = Some(25);
        assert_eq!(blueprint.recorder_config().color.fps, Some(25));

        // no camera: the encoder falls back to the default rate
        let radar_only = RigBlueprint::default();
        let config = radar_only.recorder_config();
        assert_eq!(config.color.fps, None);
        assert_eq!(config.color.fps_or_default(), ColorEncoderConfig::DEFAULT_FPS);
    }
}

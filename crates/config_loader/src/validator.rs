//! 配置校验模块
//!
//! 校验规则：
//! - 每种传感器至多配置一个
//! - 设备描述符非空
//! - 各队列容量 >= 1
//! - reorder_window <= 64
//! - zstd 等级 1..=22，fps > 0，crf <= 51
//! - 超时 > 0

use std::collections::HashSet;

use contracts::{ContractError, RigBlueprint};

pub const MAX_REORDER_WINDOW: usize = 64;

/// 校验 RigBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    validate_sensors(blueprint)?;
    validate_transport(blueprint)?;
    validate_supervisor(blueprint)?;
    validate_recorder(blueprint)?;
    Ok(())
}

fn validate_sensors(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sensor) in blueprint.sensors.iter().enumerate() {
        if !seen.insert(sensor.sensor) {
            return Err(ContractError::config_validation(
                format!("sensors[{idx}].sensor"),
                format!("duplicate sensor '{}'", sensor.sensor),
            ));
        }
        if sensor.device.as_str().trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("sensors[{idx}].device"),
                "device descriptor cannot be empty",
            ));
        }
        if let Some(radar) = &sensor.radar {
            if radar.stall_timeout_ms == 0 {
                return Err(ContractError::config_validation(
                    format!("sensors[{idx}].radar.stall_timeout_ms"),
                    "stall_timeout_ms must be > 0",
                ));
            }
            if radar.baud_rate == 0 {
                return Err(ContractError::config_validation(
                    format!("sensors[{idx}].radar.baud_rate"),
                    "baud_rate must be > 0",
                ));
            }
        }
        if let Some(camera) = &sensor.camera {
            if camera.width == 0 || camera.height == 0 {
                return Err(ContractError::config_validation(
                    format!("sensors[{idx}].camera"),
                    format!("resolution must be non-zero, got {}x{}", camera.width, camera.height),
                ));
            }
            if camera.fps == 0 {
                return Err(ContractError::config_validation(
                    format!("sensors[{idx}].camera.fps"),
                    "fps must be > 0",
                ));
            }
            if !(camera.depth_scale.is_finite() && camera.depth_scale > 0.0) {
                return Err(ContractError::config_validation(
                    format!("sensors[{idx}].camera.depth_scale"),
                    format!("depth_scale must be > 0, got {}", camera.depth_scale),
                ));
            }
        }
    }
    Ok(())
}

fn validate_transport(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let t = &blueprint.transport;
    let capacities = [
        ("transport.pointcloud_capacity", t.pointcloud_capacity),
        ("transport.color_capacity", t.color_capacity),
        ("transport.depth_capacity", t.depth_capacity),
        ("transport.recording_capacity", t.recording_capacity),
        ("transport.pipe_capacity", t.pipe_capacity),
    ];
    for (field, capacity) in capacities {
        if capacity == 0 {
            return Err(ContractError::config_validation(field, "capacity must be >= 1"));
        }
    }
    Ok(())
}

fn validate_supervisor(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let s = &blueprint.supervisor;
    if s.connect_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            "supervisor.connect_timeout_ms",
            "connect_timeout_ms must be > 0",
        ));
    }
    if s.stop_grace_ms == 0 {
        return Err(ContractError::config_validation(
            "supervisor.stop_grace_ms",
            "stop_grace_ms must be > 0",
        ));
    }
    Ok(())
}

fn validate_recorder(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let r = &blueprint.recorder;
    if r.output_root.as_os_str().is_empty() {
        return Err(ContractError::config_validation(
            "recorder.output_root",
            "output_root cannot be empty",
        ));
    }
    if r.reorder_window > MAX_REORDER_WINDOW {
        return Err(ContractError::config_validation(
            "recorder.reorder_window",
            format!(
                "reorder_window must be <= {MAX_REORDER_WINDOW}, got {}",
                r.reorder_window
            ),
        ));
    }
    if r.stop_grace_ms == 0 {
        return Err(ContractError::config_validation(
            "recorder.stop_grace_ms",
            "stop_grace_ms must be > 0",
        ));
    }
    if r.pointcloud.batch_frames == 0 {
        return Err(ContractError::config_validation(
            "recorder.pointcloud.batch_frames",
            "batch_frames must be >= 1",
        ));
    }
    if !(1..=22).contains(&r.depth.compression_level) {
        return Err(ContractError::config_validation(
            "recorder.depth.compression_level",
            format!(
                "compression_level must be within 1..=22, got {}",
                r.depth.compression_level
            ),
        ));
    }
    if r.color.fps == Some(0) {
        return Err(ContractError::config_validation("recorder.color.fps", "fps must be > 0"));
    }
    if r.color.crf > 51 {
        return Err(ContractError::config_validation(
            "recorder.color.crf",
            format!("crf must be <= 51, got {}", r.color.crf),
        ));
    }
    if r.color.codec.is_empty() || r.color.preset.is_empty() {
        return Err(ContractError::config_validation(
            "recorder.color",
            "codec and preset cannot be empty",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CameraSettings, DeviceDescriptor, SensorConfig, SensorKind};

    fn sensor(kind: SensorKind, device: &str) -> SensorConfig {
        SensorConfig {
            sensor: kind,
            device: DeviceDescriptor::new(device),
            radar: None,
            camera: None,
        }
    }

    fn valid_blueprint() -> RigBlueprint {
        RigBlueprint {
            sensors: vec![
                sensor(SensorKind::Radar, "/dev/ttyACM1"),
                sensor(SensorKind::Camera, "synthetic:cam"),
            ],
            ..RigBlueprint::default()
        }
    }

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_valid_blueprint() {
        assert!(validate(&valid_blueprint()).is_ok());
    }

    #[test]
    fn test_duplicate_sensor() {
        let mut bp = valid_blueprint();
        bp.sensors.push(sensor(SensorKind::Radar, "COM4"));
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_device() {
        let mut bp = valid_blueprint();
        bp.sensors[0].device = DeviceDescriptor::new("  ");
        assert_eq!(field_of(validate(&bp).unwrap_err()), "sensors[0].device");
    }

    #[test]
    fn test_zero_capacity() {
        let mut bp = valid_blueprint();
        bp.transport.recording_capacity = 0;
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "transport.recording_capacity"
        );
    }

    #[test]
    fn test_reorder_window_bound() {
        let mut bp = valid_blueprint();
        bp.recorder.reorder_window = MAX_REORDER_WINDOW;
        assert!(validate(&bp).is_ok());
        bp.recorder.reorder_window = MAX_REORDER_WINDOW + 1;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "recorder.reorder_window");
    }

    #[test]
    fn test_encoder_limits() {
        let mut bp = valid_blueprint();
        bp.recorder.depth.compression_level = 0;
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "recorder.depth.compression_level"
        );

        let mut bp = valid_blueprint();
        bp.recorder.color.crf = 52;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "recorder.color.crf");

        let mut bp = valid_blueprint();
        bp.recorder.color.fps = Some(0);
        assert_eq!(field_of(validate(&bp).unwrap_err()), "recorder.color.fps");
        bp.recorder.color.fps = None;
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_camera_zero_fps() {
        let mut bp = valid_blueprint();
        bp.sensors[1].camera = Some(CameraSettings {
            fps: 0,
            ..CameraSettings::default()
        });
        assert_eq!(field_of(validate(&bp).unwrap_err()), "sensors[1].camera.fps");
    }

    #[test]
    fn test_zero_timeouts() {
        let mut bp = valid_blueprint();
        bp.supervisor.stop_grace_ms = 0;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "supervisor.stop_grace_ms");
    }
}

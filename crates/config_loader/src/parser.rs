//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, RigBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<RigBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<RigBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<RigBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{LogFormat, SensorKind};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[[sensors]]
sensor = "radar"
device = "/dev/ttyACM1"

[sensors.radar]
baud_rate = 460800
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.sensors.len(), 1);
        assert_eq!(bp.sensors[0].sensor, SensorKind::Radar);
        assert_eq!(bp.sensors[0].device.as_str(), "/dev/ttyACM1");
        let radar = bp.sensors[0].radar.as_ref().unwrap();
        assert_eq!(radar.baud_rate, 460_800);
        // unspecified fields keep their defaults
        assert_eq!(radar.stall_timeout_ms, 2_000);
        assert_eq!(bp.recorder.reorder_window, 4);
        assert_eq!(bp.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "sensors": [
                { "sensor": "camera", "device": "synthetic:cam", "camera": { "width": 320, "height": 240 } }
            ],
            "transport": { "color_capacity": 2 },
            "observability": { "log_format": "json", "metrics_port": 9000 }
        }"#;
        let bp = parse_json(content).unwrap();
        assert_eq!(bp.sensors[0].camera.as_ref().unwrap().width, 320);
        assert_eq!(bp.transport.color_capacity, 2);
        assert_eq!(bp.transport.depth_capacity, 4);
        assert_eq!(bp.observability.metrics_port, 9000);
    }

    #[test]
    fn test_parse_unknown_sensor_kind() {
        let content = r#"
[[sensors]]
sensor = "lidar"
device = "x"
"#;
        let err = parse_toml(content).unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}

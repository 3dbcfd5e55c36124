//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{RigBlueprint, SensorKind, StreamKey};
use sensor_worker::camera::realsense_serial;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    sensors: Vec<SensorSummary>,
    stream_count: usize,
    output_root: String,
    reorder_window: usize,
    metrics_port: Option<u16>,
}

#[derive(Serialize)]
struct SensorSummary {
    sensor: SensorKind,
    device: String,
    synthetic: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(summarize(&blueprint)),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

fn summarize(blueprint: &RigBlueprint) -> ConfigSummary {
    ConfigSummary {
        version: format!("{:?}", blueprint.version),
        sensors: blueprint
            .sensors
            .iter()
            .map(|s| SensorSummary {
                sensor: s.sensor,
                device: s.device.to_string(),
                synthetic: s.device.is_synthetic(),
            })
            .collect(),
        stream_count: blueprint
            .sensors
            .iter()
            .map(|s| StreamKey::for_sensor(s.sensor).count())
            .sum(),
        output_root: blueprint.recorder.output_root.display().to_string(),
        reorder_window: blueprint.recorder.reorder_window,
        metrics_port: (blueprint.observability.metrics_port != 0)
            .then_some(blueprint.observability.metrics_port),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &RigBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sensors.is_empty() {
        warnings.push("No sensors configured - nothing to record".to_string());
    }

    for sensor in &blueprint.sensors {
        if sensor.device.is_synthetic() {
            warnings.push(format!(
                "Sensor '{}' uses synthetic device '{}'",
                sensor.sensor, sensor.device
            ));
        }
        if sensor.sensor == SensorKind::Camera
            && realsense_serial(sensor.device.as_str()).is_some()
            && !cfg!(feature = "realsense")
        {
            warnings.push(format!(
                "Sensor '{}' uses RealSense device '{}' but this build lacks `--features realsense`",
                sensor.sensor, sensor.device
            ));
        }
    }

    let records_color = blueprint
        .sensors
        .iter()
        .any(|s| s.sensor == SensorKind::Camera);
    if records_color && !ffmpeg_available(&blueprint.recorder.color.ffmpeg_path) {
        warnings.push(format!(
            "ffmpeg not runnable at '{}' - color recording will fail",
            blueprint.recorder.color.ffmpeg_path.display()
        ));
    }

    let camera_fps = blueprint
        .sensor(SensorKind::Camera)
        .map(|s| s.camera.clone().unwrap_or_default().fps);
    if let (Some(camera_fps), Some(video_fps)) = (camera_fps, blueprint.recorder.color.fps) {
        if camera_fps != video_fps {
            warnings.push(format!(
                "recorder.color.fps ({video_fps}) differs from camera fps ({camera_fps}) - \
                 frames are repeated or merged to keep playback timing"
            ));
        }
    }

    if blueprint.recorder.reorder_window == 0 {
        warnings.push("recorder.reorder_window is 0 - any reordering counts as a drop".to_string());
    }

    warnings
}

fn ffmpeg_available(path: &std::path::Path) -> bool {
    std::process::Command::new(path)
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Sensors:");
            for sensor in &summary.sensors {
                println!("    - {} @ {}", sensor.sensor, sensor.device);
            }
            println!("  Streams: {}", summary.stream_count);
            println!("  Output root: {}", summary.output_root);
            println!("  Reorder window: {}", summary.reorder_window);
            if let Some(port) = summary.metrics_port {
                println!("  Metrics port: {port}");
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_config_with_synthetic_warning() {
        let file = write_config(
            r#"
[[sensors]]
sensor = "radar"
device = "synthetic:bench"
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid);
        let summary = result.summary.unwrap();
        assert_eq!(summary.stream_count, 1);
        assert!(summary.sensors[0].synthetic);
        assert!(result.warnings.unwrap()[0].contains("synthetic"));
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let result = validate_config(&ValidateArgs {
            config: "/nonexistent/rig.toml".into(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[test]
    fn test_duplicate_sensor_is_invalid() {
        let file = write_config(
            r#"
[[sensors]]
sensor = "camera"
device = "synthetic:a"

[[sensors]]
sensor = "camera"
device = "synthetic:b"
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        });
        assert!(!result.valid);
    }

    #[test]
    fn test_color_rate_mismatch_warns() {
        let file = write_config(
            r#"
[[sensors]]
sensor = "camera"
device = "synthetic:cam"

[sensors.camera]
fps = 60

[recorder.color]
fps = 30
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("differs from camera fps (60)")));
    }

    #[cfg(not(feature = "realsense"))]
    #[test]
    fn test_realsense_without_feature_warns() {
        let file = write_config(
            r#"
[[sensors]]
sensor = "camera"
device = "realsense:013422060148"
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("lacks `--features realsense`")));
    }
}

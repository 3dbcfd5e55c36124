//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `RigBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("config.toml")).unwrap();
//! println!("Sensors: {}", blueprint.sensors.len());
//! ```

mod parser;
mod validator;

pub use contracts::RigBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    /// Relative paths inside the file are resolved against the file's directory.
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<RigBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        let mut blueprint = Self::load_from_str(&content, format)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            resolve_paths(&mut blueprint, base);
        }
        Ok(blueprint)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<RigBlueprint, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Serialize RigBlueprint to TOML string
    pub fn to_toml(blueprint: &RigBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize RigBlueprint to JSON string
    pub fn to_json(blueprint: &RigBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<RigBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }
}

/// 配置文件中的相对路径以配置文件所在目录为基准；
/// 不含路径分隔符的程序名（如 `ffmpeg`）仍按 PATH 查找
fn resolve_paths(blueprint: &mut RigBlueprint, base: &Path) {
    let rebase = |path: &mut PathBuf| {
        if path.is_relative() {
            *path = base.join(&*path);
        }
    };
    rebase(&mut blueprint.recorder.output_root);
    if let Some(dir) = blueprint.supervisor.device_lock_dir.as_mut() {
        rebase(dir);
    }
    for program in [
        blueprint.supervisor.worker_program.as_mut(),
        Some(&mut blueprint.recorder.color.ffmpeg_path),
    ]
    .into_iter()
    .flatten()
    {
        if program.components().count() > 1 {
            rebase(program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SensorKind;

    const RIG_TOML: &str = r#"
[[sensors]]
sensor = "radar"
device = "synthetic:radar"

[sensors.radar]
synthetic_points = 8
synthetic_corrupt_frames = [3]

[[sensors]]
sensor = "camera"
device = "synthetic:camera"

[sensors.camera]
width = 320
height = 240
fps = 15

[transport]
recording_capacity = 128

[recorder]
output_root = "/tmp/recordings"
reorder_window = 8

[recorder.color]
crf = 23
"#;

    #[test]
    fn test_load_from_str_toml() {
        let bp = ConfigLoader::load_from_str(RIG_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.sensors.len(), 2);
        let camera = bp.sensor(SensorKind::Camera).unwrap();
        assert_eq!(camera.camera.as_ref().unwrap().fps, 15);
        assert_eq!(bp.transport.recording_capacity, 128);
        assert_eq!(bp.recorder.reorder_window, 8);
        assert_eq!(bp.recorder.color.crf, 23);
        assert_eq!(bp.recorder.color.preset, "fast");
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(RIG_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.sensors.len(), bp2.sensors.len());
        assert_eq!(bp.sensors[0].device, bp2.sensors[0].device);
        assert_eq!(bp.sensors[0].radar, bp2.sensors[0].radar);
        assert_eq!(bp.recorder.output_root, bp2.recorder.output_root);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(RIG_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.sensors[1].camera, bp2.sensors[1].camera);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[[sensors]]
sensor = "radar"
device = "COM3"

[[sensors]]
sensor = "radar"
device = "COM4"
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.toml");
        std::fs::write(&path, RIG_TOML).unwrap();
        let bp = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(bp.sensors.len(), 2);

        // output_root is absolute in RIG_TOML
        assert_eq!(bp.recorder.output_root, PathBuf::from("/tmp/recordings"));

        let bad = dir.path().join("rig.yaml");
        std::fs::write(&bad, RIG_TOML).unwrap();
        assert!(ConfigLoader::load_from_path(&bad).is_err());
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.toml");
        let content = r#"
[[sensors]]
sensor = "radar"
device = "synthetic:radar"

[supervisor]
worker_program = "bin/fusion-recorder"

[recorder]
output_root = "out"
"#;
        std::fs::write(&path, content).unwrap();
        let bp = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(bp.recorder.output_root, dir.path().join("out"));
        assert_eq!(
            bp.supervisor.worker_program,
            Some(dir.path().join("bin/fusion-recorder"))
        );
        // bare program names stay on PATH
        assert_eq!(bp.recorder.color.ffmpeg_path, PathBuf::from("ffmpeg"));
    }
}

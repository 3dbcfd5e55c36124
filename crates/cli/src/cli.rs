//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Fusion Recorder - radar + depth/color camera acquisition and recording
#[derive(Parser, Debug)]
#[command(
    name = "fusion-recorder",
    author,
    version,
    about = "Radar + depth camera acquisition and recording",
    long_about = "Runs one isolated worker process per sensor, shows the live streams\n\
                  and records them to a timestamped session directory\n\
                  (Arrow point clouds, zstd depth, H.264 color)."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FUSION_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FUSION_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach every configured sensor and record all of their streams
    Record(RecordArgs),

    /// Attach every configured sensor and watch the live (display) path
    Monitor(MonitorArgs),

    /// Validate configuration file without touching any device
    Validate(ValidateArgs),

    /// Read back and summarize a recorded session directory
    Inspect(InspectArgs),

    /// Sensor worker process (spawned by the supervisor)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RecordArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "rig.toml", env = "FUSION_CONFIG")]
    pub config: PathBuf,

    /// Override the recording root directory from configuration
    #[arg(short, long, env = "FUSION_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Stop after this many seconds (default: until Ctrl+C)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Run workers as tasks in this process instead of child processes
    #[arg(long)]
    pub in_process: bool,

    /// Seconds between progress log lines
    #[arg(long, default_value = "5")]
    pub progress_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct MonitorArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "rig.toml", env = "FUSION_CONFIG")]
    pub config: PathBuf,

    /// Poll interval of the display path
    #[arg(long, default_value = "500")]
    pub interval_ms: u64,

    /// Stop after this many seconds (default: until Ctrl+C)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Run workers as tasks in this process instead of child processes
    #[arg(long)]
    pub in_process: bool,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "rig.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Session directory (`record_YYYYMMDD_HHMMSS`)
    pub session: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[arg(long)]
    pub sensor: contracts::SensorKind,

    /// Serialized `WorkerSettings`
    #[arg(long)]
    pub settings: String,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

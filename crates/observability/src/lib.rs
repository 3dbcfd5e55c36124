//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式，stdout 或 stderr)
//! - Prometheus 指标导出
//! - 采集/录制指标与在线统计
//!
//! Worker 进程的 stdout 是事件管道，因此 worker 必须使用 [`LogTarget::Stderr`]。
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{init_with_config, ObservabilityConfig};
//!
//! observability::init_with_config(ObservabilityConfig::default())?;
//! observability::metrics::record_frame_received("radar", "pointcloud");
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use contracts::LogFormat;

// Re-exports
pub use crate::metrics::{
    record_display_dropped, record_encode_latency_ms, record_frame_received,
    record_recording_backlog, record_recording_dropped, record_worker_state, RunningStats,
    StatsSummary,
};

/// 初始化可观测性（Tracing + Prometheus）
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 日志输出目标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 日志格式
    pub log_format: LogFormat,
    /// 日志输出目标
    pub log_target: LogTarget,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// 默认日志级别
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_target: LogTarget::Stdout,
            metrics_port: None,
            default_log_level: "info".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// 从蓝图中的配置段构造（端口 0 表示关闭导出）
    pub fn from_blueprint(config: &contracts::ObservabilityConfig) -> Self {
        Self {
            log_format: config.log_format,
            metrics_port: (config.metrics_port != 0).then_some(config.metrics_port),
            ..Self::default()
        }
    }

    /// Worker 进程使用的配置：stderr、无指标导出
    pub fn for_worker(log_format: LogFormat, default_log_level: impl Into<String>) -> Self {
        Self {
            log_format,
            log_target: LogTarget::Stderr,
            metrics_port: None,
            default_log_level: default_log_level.into(),
        }
    }
}

fn make_writer(target: LogTarget) -> BoxMakeWriter {
    match target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    }
}

/// 使用自定义配置初始化
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    // 1. Initialize Tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));
    let writer = make_writer(config.log_target);

    match config.log_format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer().pretty().with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer().compact().with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
    }

    // 2. Initialize Prometheus Exporter (if enabled)
    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        log_target = ?config.log_target,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );

    Ok(())
}

/// 仅初始化 Prometheus 指标（不初始化 Tracing）
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.log_target, LogTarget::Stdout);
        assert_eq!(config.default_log_level, "info");
    }

    #[test]
    fn test_from_blueprint_port_zero_disables_export() {
        let config = ObservabilityConfig::from_blueprint(&contracts::ObservabilityConfig {
            log_format: LogFormat::Json,
            metrics_port: 0,
        });
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.log_format, LogFormat::Json);

        let config = ObservabilityConfig::from_blueprint(&contracts::ObservabilityConfig {
            log_format: LogFormat::Compact,
            metrics_port: 9100,
        });
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn test_worker_logs_to_stderr() {
        let config = ObservabilityConfig::for_worker(LogFormat::Compact, "debug");
        assert_eq!(config.log_target, LogTarget::Stderr);
        assert_eq!(config.metrics_port, None);
    }
}

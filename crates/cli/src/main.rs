//! # Fusion Recorder CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 采集 / 录制生命周期管理
//! - 录制结果回读
//! - worker 子进程入口（隐藏命令）

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_inspect, run_monitor, run_record, run_validate, run_worker};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // worker 的 stdout 是数据管道，日志只能走 stderr
    let logging = match cli.command {
        Commands::Worker(_) => ObservabilityConfig::for_worker(cli.log_format.into(), cli.log_level()),
        _ => ObservabilityConfig {
            log_format: cli.log_format.into(),
            default_log_level: cli.log_level().to_string(),
            ..Default::default()
        },
    };
    observability::init_with_config(logging)?;

    let result = match &cli.command {
        Commands::Record(args) => {
            info!(version = env!("CARGO_PKG_VERSION"), "Fusion Recorder starting");
            run_record(args).await
        }
        Commands::Monitor(args) => run_monitor(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Inspect(args) => run_inspect(args),
        // stdin 读取占用阻塞线程，直接退出而不是等待 runtime 关闭
        Commands::Worker(args) => std::process::exit(run_worker(args).await),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

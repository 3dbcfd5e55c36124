//! Hidden `worker` command: the sensor worker process.

use contracts::WorkerSettings;
use tracing::{debug, error, info};

use crate::cli::WorkerArgs;

/// Run the worker until its command pipe closes; returns the process exit code
pub async fn run_worker(args: &WorkerArgs) -> i32 {
    let settings: WorkerSettings = match serde_json::from_str(&args.settings) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Invalid worker settings");
            return 2;
        }
    };
    if settings.sensor != args.sensor {
        error!(
            expected = %args.sensor,
            got = %settings.sensor,
            "Worker settings are for a different sensor"
        );
        return 2;
    }

    // 由 supervisor 通过命令管道停止；终端信号一律忽略
    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("Ignoring Ctrl+C in worker");
        }
    });

    info!(sensor = %args.sensor, pid = std::process::id(), "Worker process started");
    match sensor_worker::run_stdio(settings).await {
        Ok(()) => {
            info!(sensor = %args.sensor, "Worker process exiting");
            0
        }
        Err(e) => {
            error!(sensor = %args.sensor, error = %e, "Worker process failed");
            1
        }
    }
}

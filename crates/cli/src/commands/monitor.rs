//! `monitor` command: exercise the display path without recording.

use std::time::Duration;

use anyhow::{Context, Result};
use contracts::StreamKey;
use tracing::{info, warn};

use super::{build_supervisor, deadline, load_blueprint, shutdown_signal};
use crate::cli::MonitorArgs;

/// Execute the `monitor` command
pub async fn run_monitor(args: &MonitorArgs) -> Result<()> {
    let blueprint = load_blueprint(&args.config)?;
    let mut supervisor = build_supervisor(&blueprint, args.in_process)?;

    let result = async {
        let attached = supervisor
            .attach_configured()
            .await
            .context("Failed to attach sensors")?;
        for info in &attached {
            supervisor
                .start_streaming(info.sensor)
                .await
                .with_context(|| format!("Failed to start streaming {}", info.sensor))?;
        }
        let streams: Vec<StreamKey> = attached
            .iter()
            .flat_map(|info| StreamKey::for_sensor(info.sensor))
            .collect();

        let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(10)));
        let shutdown = shutdown_signal();
        let until = deadline(args.duration);
        tokio::pin!(shutdown, until);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Received shutdown signal");
                    break;
                }
                _ = &mut until => break,
                _ = ticker.tick() => {
                    for &key in &streams {
                        poll_once(&supervisor, key);
                    }
                }
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    for report in supervisor.shutdown().await {
        info!(
            sensor = %report.sensor,
            graceful = report.graceful,
            emitted = ?report.emitted,
            "Sensor detached"
        );
    }
    result
}

fn poll_once(supervisor: &supervisor::AcquisitionSupervisor, key: StreamKey) {
    match supervisor.poll_stream(key) {
        Ok(Some(frame)) => {
            let stats = supervisor.stream_stats(key).unwrap_or_default();
            info!(
                stream = %key,
                sequence = frame.sequence,
                capture_time = %frame.capture_time,
                size_bytes = frame.payload.size_bytes(),
                received = stats.received,
                display_dropped = stats.display_dropped,
                "Latest frame"
            );
        }
        Ok(None) => {}
        Err(e) => warn!(stream = %key, error = %e, "Stream unavailable"),
    }
}

//! `record` command implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{SensorKind, StreamKey, StreamKind};
use recorder::{Recorder, RecordingSession, SessionReport};
use supervisor::{AcquisitionSupervisor, SupervisorEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use super::{build_supervisor, deadline, load_blueprint, shutdown_signal};
use crate::cli::RecordArgs;

/// Execute the `record` command
pub async fn run_record(args: &RecordArgs) -> Result<()> {
    let mut blueprint = load_blueprint(&args.config)?;
    // 先订阅录制再推流，录制从第 0 帧开始
    blueprint.supervisor.autostart_streaming = false;

    info!(
        sensors = blueprint.sensors.len(),
        output = %args.output.as_deref().unwrap_or(&blueprint.recorder.output_root).display(),
        "Configuration loaded"
    );

    let mut supervisor = build_supervisor(&blueprint, args.in_process)?;
    let result = record_session(&mut supervisor, blueprint.recorder_config(), args).await;

    for report in supervisor.shutdown().await {
        if !report.graceful {
            warn!(sensor = %report.sensor, "Worker had to be force-terminated");
        }
    }
    result
}

async fn record_session(
    supervisor: &mut AcquisitionSupervisor,
    config: contracts::RecorderConfig,
    args: &RecordArgs,
) -> Result<()> {
    let attached = supervisor
        .attach_configured()
        .await
        .context("Failed to attach sensors")?;
    for info in &attached {
        info!(sensor = %info.sensor, device = %info.descriptor, pid = ?info.pid, "Sensor attached");
    }
    let sensors: Vec<SensorKind> = attached.iter().map(|info| info.sensor).collect();
    let streams: Vec<StreamKey> = sensors
        .iter()
        .flat_map(|&sensor| StreamKey::for_sensor(sensor))
        .collect();

    let mut recorder = Recorder::new(config);
    let mut session = recorder
        .start(&*supervisor, &streams, args.output.as_deref())
        .context("Failed to start recording")?;
    info!(dir = %session.directory().display(), "Recording");

    for &sensor in &sensors {
        supervisor
            .start_streaming(sensor)
            .await
            .with_context(|| format!("Failed to start streaming {sensor}"))?;
    }

    wait_for_stop(supervisor, &session, args).await;

    // stop_streaming 返回时所有帧都已进入录制队列
    let mut emitted: BTreeMap<StreamKind, u64> = BTreeMap::new();
    for &sensor in &sensors {
        match supervisor.stop_streaming(sensor).await {
            Ok(summary) => emitted.extend(summary.emitted),
            Err(e) => warn!(sensor = %sensor, error = %e, "Failed to stop streaming"),
        }
    }

    match recorder.stop(&mut session).await {
        Ok(report) => {
            print_report(&report, &emitted);
            Ok(())
        }
        Err(e) => {
            if let Some(report) = session.report() {
                print_report(report, &emitted);
            }
            Err(e).context("Recording failed")
        }
    }
}

async fn wait_for_stop(
    supervisor: &AcquisitionSupervisor,
    session: &RecordingSession,
    args: &RecordArgs,
) {
    let mut events = supervisor.subscribe_events();
    let mut progress = tokio::time::interval(Duration::from_secs(args.progress_secs.max(1)));
    progress.tick().await;
    let mut watchdog = tokio::time::interval(Duration::from_millis(200));

    let shutdown = shutdown_signal();
    let until = deadline(args.duration);
    tokio::pin!(shutdown, until);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Received shutdown signal, stopping recording...");
                return;
            }
            _ = &mut until => {
                info!("Recording duration reached");
                return;
            }
            _ = watchdog.tick() => {
                if session.state().is_terminal() {
                    error!(state = ?session.state(), "Recording session ended early");
                    return;
                }
            }
            _ = progress.tick() => {
                for stream in session.progress() {
                    info!(
                        stream = %stream.stream,
                        frames = stream.frames_written,
                        dropped = stream.dropped_frames,
                        backlog = stream.backlog,
                        "Recording progress"
                    );
                }
            }
            event = events.recv() => match event {
                Ok(SupervisorEvent::ReconnectNeeded { sensor, reason }) => {
                    error!(sensor = %sensor, reason = %reason, "Sensor worker lost; its streams stop here");
                }
                Ok(SupervisorEvent::Fault { sensor, failure }) => {
                    error!(sensor = %sensor, failure = ?failure, "Sensor fault");
                }
                Ok(SupervisorEvent::StateChanged { .. }) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed supervisor events"),
                Err(RecvError::Closed) => return,
            },
        }
    }
}

fn print_report(report: &SessionReport, emitted: &BTreeMap<StreamKind, u64>) {
    println!("\n=== Recording Session ===\n");
    println!("  Directory: {}", report.directory.display());
    println!("  State:     {:?}", report.state);
    println!("  Started:   {}", report.started_at);
    if let Some(finished) = &report.finished_at {
        println!("  Finished:  {finished}");
    }

    println!("\nStreams ({}):", report.streams.len());
    for stream in &report.streams {
        let produced = emitted
            .get(&stream.stream.stream)
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        println!(
            "  - {:<18} {:>7} written / {:>7} produced, {} dropped in {} gaps, {} late",
            stream.stream.to_string(),
            stream.frames_written,
            produced,
            stream.dropped_frames,
            stream.drop_events,
            stream.late_frames
        );
        println!("    file: {}  encode ms: {}", stream.file, stream.encode_latency_ms);
    }

    if let Some(failure) = &report.failure {
        println!("\n  Failed stream: {} ({})", failure.stream, failure.message);
    }
    println!();
}

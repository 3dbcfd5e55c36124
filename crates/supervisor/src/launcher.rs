//! Worker launchers
//!
//! `ProcessLauncher` starts one OS process per sensor (the production path).
//! `InProcessLauncher` runs the same `WorkerHost` on the local runtime over
//! in-memory pipes, used by tests and `--in-process` runs.

use std::path::PathBuf;
use std::process::Stdio;

use contracts::{TransportError, WorkerSettings};
use sensor_worker::WorkerHost;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, SupervisorError};

pub type CommandPipe = Box<dyn AsyncWrite + Send + Unpin>;
pub type EventPipe = Box<dyn AsyncRead + Send + Unpin>;

/// In-memory pipe buffer for in-process workers
const DUPLEX_BUFFER: usize = 256 * 1024;

/// A started worker: its two pipes and a way to wait for or kill it
pub struct LaunchedWorker {
    pub commands: CommandPipe,
    pub events: EventPipe,
    pub exit: WorkerExit,
}

pub enum WorkerExit {
    Process(Child),
    Task(JoinHandle<std::result::Result<(), TransportError>>),
}

impl WorkerExit {
    pub fn pid(&self) -> Option<u32> {
        match self {
            WorkerExit::Process(child) => child.id(),
            WorkerExit::Task(_) => None,
        }
    }

    /// Wait until the worker ends; `true` if it ended cleanly
    pub async fn wait(&mut self) -> bool {
        match self {
            WorkerExit::Process(child) => match child.wait().await {
                Ok(status) => {
                    if !status.success() {
                        warn!(status = %status, "worker process exited with failure");
                    }
                    status.success()
                }
                Err(e) => {
                    warn!(error = %e, "failed to wait for worker process");
                    false
                }
            },
            WorkerExit::Task(handle) => match handle.await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(error = %e, "in-process worker ended with error");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "in-process worker task failed");
                    false
                }
            },
        }
    }

    /// Forcefully terminate the worker
    pub async fn kill(&mut self) {
        match self {
            WorkerExit::Process(child) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill worker process");
                }
            }
            WorkerExit::Task(handle) => handle.abort(),
        }
    }
}

/// Starts a worker for one sensor
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, settings: &WorkerSettings) -> Result<LaunchedWorker>;
}

/// Spawns `<program> worker --sensor <kind> --settings <json>`
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Re-launch the running executable in worker mode
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, settings: &WorkerSettings) -> Result<LaunchedWorker> {
        let sensor = settings.sensor;
        let settings_json = serde_json::to_string(settings)
            .map_err(|e| SupervisorError::launch(sensor, e.to_string()))?;

        let mut command = Command::new(&self.program);
        command
            .arg("worker")
            .arg("--sensor")
            .arg(sensor.as_str())
            .arg("--settings")
            .arg(settings_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // terminal Ctrl+C goes to the supervisor only; workers are stopped via their pipe
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            SupervisorError::launch(sensor, format!("{}: {e}", self.program.display()))
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SupervisorError::launch(sensor, "worker pipes unavailable"));
        };
        info!(sensor = %sensor, pid = ?child.id(), "worker process spawned");

        Ok(LaunchedWorker {
            commands: Box::new(stdin),
            events: Box::new(stdout),
            exit: WorkerExit::Process(child),
        })
    }
}

/// Runs workers as tasks on the current runtime
///
/// Must be called from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessLauncher;

impl WorkerLauncher for InProcessLauncher {
    fn launch(&self, settings: &WorkerSettings) -> Result<LaunchedWorker> {
        let (commands, worker_input) = tokio::io::duplex(DUPLEX_BUFFER);
        let (worker_output, events) = tokio::io::duplex(DUPLEX_BUFFER);

        let host = WorkerHost::new(sensor_worker::build_worker(settings), settings);
        let task = tokio::spawn(host.run(worker_input, worker_output));
        info!(sensor = %settings.sensor, "in-process worker started");

        Ok(LaunchedWorker {
            commands: Box::new(commands),
            events: Box::new(events),
            exit: WorkerExit::Task(task),
        })
    }
}

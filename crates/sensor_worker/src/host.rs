//! WorkerHost - worker 进程主循环
//!
//! Three parts:
//! - command reader: pipe → unbounded command queue
//! - acquisition thread: applies commands, polls the device, emits events
//! - event writer: bounded event queue → pipe
//!
//! The event queue is bounded, so a consumer that stops reading the pipe
//! eventually blocks the acquisition thread instead of growing memory.

use std::time::Duration;

use contracts::{
    CaptureClock, FrameEnvelope, TransportError, WorkerCommand, WorkerEvent, WorkerSettings,
    WorkerState,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use transport::{FrameReader, FrameWriter};

use crate::error::WorkerError;
use crate::worker::SensorWorker;

pub struct WorkerHost {
    worker: Box<dyn SensorWorker>,
    poll_interval: Duration,
    event_capacity: usize,
}

impl WorkerHost {
    pub fn new(worker: Box<dyn SensorWorker>, settings: &WorkerSettings) -> Self {
        Self {
            worker,
            poll_interval: settings.poll_interval(),
            event_capacity: settings.event_capacity.max(1),
        }
    }

    /// Serve commands from `input` and write events to `output` until shutdown
    ///
    /// Returns once a `Shutdown` command was handled, the command pipe closed,
    /// or the event pipe broke. The device is always released before returning.
    pub async fn run<R, W>(self, input: R, output: W) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let sensor = self.worker.sensor();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(self.event_capacity);

        let reader = tokio::spawn(async move {
            let mut reader = FrameReader::new(input);
            loop {
                match reader.next::<WorkerCommand>().await {
                    Ok(Some(command)) => {
                        debug!(command = command.name(), "command received");
                        if command_tx.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("command pipe closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "command pipe failed");
                        break;
                    }
                }
            }
            // supervisor gone: release the device
            let _ = command_tx.send(WorkerCommand::Shutdown);
        });

        let writer = tokio::spawn(async move {
            let mut writer = FrameWriter::new(output);
            while let Some(event) = event_rx.recv().await {
                if let Err(e) = writer.send(&event).await {
                    warn!(error = %e, "event pipe failed");
                    return Err(e);
                }
            }
            let _ = writer.shutdown().await;
            Ok(())
        });

        if event_tx
            .send(WorkerEvent::Ready {
                pid: std::process::id(),
            })
            .await
            .is_err()
        {
            reader.abort();
            return Err(TransportError::disconnected("event pipe closed before ready"));
        }
        info!(sensor = %sensor, "worker ready");

        let worker = self.worker;
        let poll_interval = self.poll_interval;
        let acquisition = tokio::task::spawn_blocking(move || {
            acquisition_loop(worker, command_rx, event_tx, poll_interval)
        });

        if let Err(e) = acquisition.await {
            error!(error = %e, "acquisition thread panicked");
        }
        reader.abort();
        match writer.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::disconnected(format!("event writer failed: {e}"))),
        }
    }
}

/// Result of applying one command
struct Applied {
    reply: WorkerEvent,
    exit: bool,
}

fn apply(worker: &mut dyn SensorWorker, command: WorkerCommand) -> Applied {
    let name = command.name();
    let reject = |reason: String| Applied {
        reply: WorkerEvent::Rejected {
            command: name.to_string(),
            reason,
        },
        exit: false,
    };

    if worker.state() == WorkerState::Error
        && !matches!(command, WorkerCommand::Disconnect | WorkerCommand::Shutdown)
    {
        return reject("worker is in error state; disconnect first".to_string());
    }

    match command {
        WorkerCommand::Connect {
            descriptor,
            clock_anchor_ns,
        } => match worker.connect(&descriptor, CaptureClock::anchored(clock_anchor_ns)) {
            Ok(()) => Applied {
                reply: WorkerEvent::Connected,
                exit: false,
            },
            Err(WorkerError::Device(e)) => Applied {
                reply: WorkerEvent::ConnectFailed(e.into()),
                exit: false,
            },
            Err(e) => reject(e.to_string()),
        },
        WorkerCommand::StartStreaming => match worker.start_streaming() {
            Ok(()) => Applied {
                reply: WorkerEvent::StreamingStarted,
                exit: false,
            },
            Err(e) => reject(e.to_string()),
        },
        WorkerCommand::StopStreaming => match worker.stop_streaming() {
            Ok(emitted) => Applied {
                reply: WorkerEvent::StreamingStopped { emitted },
                exit: false,
            },
            Err(e) => reject(e.to_string()),
        },
        WorkerCommand::Disconnect => {
            worker.disconnect();
            Applied {
                reply: WorkerEvent::Disconnected,
                exit: false,
            }
        }
        WorkerCommand::Shutdown => {
            worker.disconnect();
            Applied {
                reply: WorkerEvent::Disconnected,
                exit: true,
            }
        }
    }
}

fn acquisition_loop(
    mut worker: Box<dyn SensorWorker>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::Sender<WorkerEvent>,
    poll_interval: Duration,
) {
    let mut frames: Vec<FrameEnvelope> = Vec::new();
    loop {
        // commands are observed at every device-poll boundary
        let command = if worker.state() == WorkerState::Streaming {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(mpsc::error::TryRecvError::Empty) => None,
                Err(mpsc::error::TryRecvError::Disconnected) => Some(WorkerCommand::Shutdown),
            }
        } else {
            Some(commands.blocking_recv().unwrap_or(WorkerCommand::Shutdown))
        };

        if let Some(command) = command {
            let applied = apply(worker.as_mut(), command);
            if events.blocking_send(applied.reply).is_err() {
                debug!("event pipe gone, stopping acquisition");
                break;
            }
            if applied.exit {
                break;
            }
            continue;
        }

        match worker.poll_frames(poll_interval, &mut frames) {
            Ok(()) => {
                for envelope in frames.drain(..) {
                    // blocks while the pipe is full: backpressure reaches the device loop here
                    if events.blocking_send(WorkerEvent::Frame(envelope)).is_err() {
                        debug!("event pipe gone, stopping acquisition");
                        worker.disconnect();
                        return;
                    }
                }
            }
            Err(e) => {
                frames.clear();
                error!(error = %e, "device fault");
                if events.blocking_send(WorkerEvent::Fault(e.into())).is_err() {
                    break;
                }
            }
        }
    }
    worker.disconnect();
    info!("acquisition stopped");
}

//! WorkerHandle - supervisor 侧的 worker 代理
//!
//! 每个 handle 拥有一个 pump 任务：读取 worker 事件管道，
//! 帧写入显示队列（drop-oldest）和可选的录制队列（背压），
//! 命令应答转交给发起请求的一方。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use contracts::{
    ConnectionState, DeviceDescriptor, DeviceFailure, FrameEnvelope, SensorKind, StreamKind,
    TransportConfig, TransportError, WorkerCommand, WorkerEvent,
};
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};
use transport::{FrameQueue, FrameReader, FrameWriter, OverflowPolicy, QueueReceiver, QueueSender};

use crate::error::{Result, SupervisorError};
use crate::launcher::{CommandPipe, LaunchedWorker, WorkerExit};

/// Supervisor 广播的生命周期事件
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    StateChanged {
        sensor: SensorKind,
        state: ConnectionState,
    },
    /// Worker reported an unrecoverable device failure
    Fault {
        sensor: SensorKind,
        failure: DeviceFailure,
    },
    /// Worker went away without being detached; detach and attach again to recover
    ReconnectNeeded { sensor: SensorKind, reason: String },
}

/// Snapshot of an attached worker
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub sensor: SensorKind,
    pub descriptor: DeviceDescriptor,
    pub pid: Option<u32>,
    pub state: ConnectionState,
    /// When the last event arrived from the worker
    pub last_seen: Option<Instant>,
}

/// Per-stream counters as seen by the supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub received: u64,
    pub display_dropped: u64,
    pub display_backlog: usize,
    pub last_sequence: Option<u64>,
    pub recording: bool,
}

/// Outcome of a detach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachReport {
    pub sensor: SensorKind,
    /// Worker exited by itself within the grace period
    pub graceful: bool,
    /// Frames emitted during the final streaming run, if one was stopped
    pub emitted: BTreeMap<StreamKind, u64>,
}

const NO_SEQUENCE: u64 = u64::MAX;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct StreamTap {
    display_tx: QueueSender,
    pub(crate) display_rx: QueueReceiver,
    pub(crate) recording: Mutex<Option<QueueSender>>,
    received: AtomicU64,
    last_sequence: AtomicU64,
}

impl StreamTap {
    fn new(display_capacity: usize) -> Self {
        let (display_tx, display_rx) =
            FrameQueue::bounded(display_capacity.max(1), OverflowPolicy::DropOldest);
        Self {
            display_tx,
            display_rx,
            recording: Mutex::new(None),
            received: AtomicU64::new(0),
            last_sequence: AtomicU64::new(NO_SEQUENCE),
        }
    }

    pub(crate) fn stats(&self) -> StreamStats {
        let last = self.last_sequence.load(Ordering::Relaxed);
        StreamStats {
            received: self.received.load(Ordering::Relaxed),
            display_dropped: self.display_rx.stats().dropped,
            display_backlog: self.display_rx.len(),
            last_sequence: (last != NO_SEQUENCE).then_some(last),
            recording: lock(&self.recording)
                .as_ref()
                .is_some_and(|sender| !sender.is_closed()),
        }
    }
}

/// State shared between a handle and its pump task
pub(crate) struct Shared {
    pub(crate) sensor: SensorKind,
    state: Mutex<ConnectionState>,
    last_seen: Mutex<Option<Instant>>,
    detaching: AtomicBool,
    pub(crate) taps: BTreeMap<StreamKind, StreamTap>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Shared {
    pub(crate) fn new(
        sensor: SensorKind,
        transport: &TransportConfig,
        events: broadcast::Sender<SupervisorEvent>,
    ) -> Self {
        let taps = sensor
            .streams()
            .iter()
            .map(|&stream| (stream, StreamTap::new(transport.display_capacity(stream))))
            .collect();
        Self {
            sensor,
            state: Mutex::new(ConnectionState::Disconnected),
            last_seen: Mutex::new(None),
            detaching: AtomicBool::new(false),
            taps,
            events,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        {
            let mut state = lock(&self.state);
            // Error is left only through detach
            if *state == next || (*state == ConnectionState::Error && next != ConnectionState::Disconnected) {
                return;
            }
            debug!(sensor = %self.sensor, from = ?*state, to = ?next, "connection state changed");
            *state = next;
        }
        observability::record_worker_state(self.sensor.as_str(), &format!("{next:?}"));
        let _ = self.events.send(SupervisorEvent::StateChanged {
            sensor: self.sensor,
            state: next,
        });
    }

    fn touch(&self) {
        *lock(&self.last_seen) = Some(Instant::now());
    }

    /// Route one frame: recording first (may wait), then display (never waits)
    async fn route(&self, envelope: FrameEnvelope) {
        let Some(tap) = self.taps.get(&envelope.stream) else {
            warn!(sensor = %self.sensor, stream = %envelope.stream, "frame for unknown stream dropped");
            return;
        };
        tap.received.fetch_add(1, Ordering::Relaxed);
        tap.last_sequence.store(envelope.sequence, Ordering::Relaxed);
        observability::record_frame_received(self.sensor.as_str(), envelope.stream.as_str());

        let recording = lock(&tap.recording).clone();
        if let Some(sender) = recording {
            if sender.push(envelope.clone()).await.is_err() {
                debug!(stream = %envelope.key(), "recording subscriber went away");
                let mut slot = lock(&tap.recording);
                if slot.as_ref().is_some_and(QueueSender::is_closed) {
                    *slot = None;
                }
            }
        }

        if let Ok(Some(displaced)) = tap.display_tx.force_push(envelope) {
            trace!(stream = %displaced.key(), sequence = displaced.sequence, "display frame displaced");
            observability::record_display_dropped(displaced.stream.as_str());
        }
    }

    /// Close display queues and recording subscriptions; pending frames stay readable
    pub(crate) fn close_taps(&self) {
        for tap in self.taps.values() {
            tap.display_tx.close();
            if let Some(sender) = lock(&tap.recording).take() {
                sender.close();
            }
        }
    }
}

/// Reads worker events until the pipe ends
async fn pump<R>(
    mut reader: FrameReader<R>,
    shared: Arc<Shared>,
    replies: mpsc::UnboundedSender<WorkerEvent>,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match reader.next::<WorkerEvent>().await {
            Ok(Some(event)) => {
                shared.touch();
                match event {
                    WorkerEvent::Frame(envelope) => shared.route(envelope).await,
                    WorkerEvent::Fault(failure) => {
                        warn!(sensor = %shared.sensor, error = %failure, "worker reported device fault");
                        shared.set_state(ConnectionState::Error);
                        let _ = shared.events.send(SupervisorEvent::Fault {
                            sensor: shared.sensor,
                            failure,
                        });
                    }
                    WorkerEvent::Ready { pid } => debug!(sensor = %shared.sensor, pid, "worker ready"),
                    reply => {
                        let _ = replies.send(reply);
                    }
                }
            }
            Ok(None) => break "worker closed its event pipe".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    shared.close_taps();
    drop(replies);
    if shared.detaching.load(Ordering::Acquire) {
        debug!(sensor = %shared.sensor, "event pump finished");
    } else {
        warn!(sensor = %shared.sensor, reason = %reason, "worker exited unexpectedly");
        shared.set_state(ConnectionState::Error);
        let _ = shared.events.send(SupervisorEvent::ReconnectNeeded {
            sensor: shared.sensor,
            reason,
        });
    }
}

/// Supervisor 侧的 worker 句柄
pub(crate) struct WorkerHandle {
    descriptor: DeviceDescriptor,
    pid: Option<u32>,
    pub(crate) shared: Arc<Shared>,
    commands: FrameWriter<CommandPipe>,
    replies: mpsc::UnboundedReceiver<WorkerEvent>,
    pump: JoinHandle<()>,
    exit: WorkerExit,
}

impl WorkerHandle {
    /// Wrap a launched worker and start its event pump
    pub(crate) fn spawn(
        launched: LaunchedWorker,
        descriptor: DeviceDescriptor,
        shared: Arc<Shared>,
    ) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(
            FrameReader::new(launched.events),
            shared.clone(),
            reply_tx,
        ));
        Self {
            descriptor,
            pid: launched.exit.pid(),
            shared,
            commands: FrameWriter::new(launched.commands),
            replies: reply_rx,
            pump,
            exit: launched.exit,
        }
    }

    pub(crate) fn sensor(&self) -> SensorKind {
        self.shared.sensor
    }

    pub(crate) fn info(&self) -> WorkerInfo {
        WorkerInfo {
            sensor: self.shared.sensor,
            descriptor: self.descriptor.clone(),
            pid: self.pid,
            state: self.shared.state(),
            last_seen: *lock(&self.shared.last_seen),
        }
    }

    pub(crate) fn tap(&self, stream: StreamKind) -> Option<&StreamTap> {
        self.shared.taps.get(&stream)
    }

    /// Send a command and wait for its reply
    #[instrument(
        name = "worker_request",
        skip(self, command, timeout),
        fields(sensor = %self.shared.sensor, command = command.name())
    )]
    pub(crate) async fn request(
        &mut self,
        command: WorkerCommand,
        timeout: Duration,
    ) -> Result<WorkerEvent> {
        let name = command.name();
        // late answers to requests that already timed out
        while let Ok(stale) = self.replies.try_recv() {
            debug!(reply = ?stale, "discarding stale reply");
        }

        self.commands.send(&command).await?;
        match tokio::time::timeout(timeout, self.replies.recv()).await {
            Ok(Some(WorkerEvent::Rejected { command, reason })) => Err(SupervisorError::Rejected {
                sensor: self.shared.sensor,
                command,
                reason,
            }),
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(TransportError::disconnected(format!(
                "{} worker exited while handling '{name}'",
                self.shared.sensor
            ))
            .into()),
            Err(_) => Err(SupervisorError::Timeout {
                sensor: self.shared.sensor,
                command: name,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Stop streaming, release the device and end the worker
    ///
    /// The worker gets `grace` to exit by itself; after that it is killed.
    #[instrument(name = "worker_terminate", skip(self, grace), fields(sensor = %self.shared.sensor))]
    pub(crate) async fn terminate(mut self, grace: Duration) -> DetachReport {
        self.shared.detaching.store(true, Ordering::Release);
        let sensor = self.shared.sensor;
        let mut emitted = BTreeMap::new();

        let orderly = tokio::time::timeout(grace, async {
            if self.shared.state() == ConnectionState::Streaming {
                match self.request(WorkerCommand::StopStreaming, grace).await {
                    Ok(WorkerEvent::StreamingStopped { emitted: counts }) => emitted = counts,
                    Ok(other) => debug!(reply = ?other, "unexpected stop reply"),
                    Err(e) => debug!(error = %e, "stop before detach failed"),
                }
            }
            for command in [WorkerCommand::Disconnect, WorkerCommand::Shutdown] {
                if let Err(e) = self.request(command, grace).await {
                    debug!(error = %e, "detach command not acknowledged");
                    break;
                }
            }
            let _ = self.commands.shutdown().await;
            // drain frames still in flight into the queues
            let _ = (&mut self.pump).await;
            self.exit.wait().await
        })
        .await;

        let graceful = match orderly {
            Ok(clean) => clean,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "worker did not exit in time, killing");
                self.exit.kill().await;
                false
            }
        };
        if !self.pump.is_finished() {
            self.pump.abort();
        }
        self.shared.close_taps();
        self.shared.set_state(ConnectionState::Disconnected);
        info!(graceful, "worker detached");

        DetachReport {
            sensor,
            graceful,
            emitted,
        }
    }
}

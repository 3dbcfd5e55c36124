//! AcquisitionSupervisor - 传感器 worker 的生命周期管理
//!
//! 每个传感器至多一个 worker。supervisor 负责启动/停止 worker、
//! 转发命令并等待应答，以及为显示和录制提供帧。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use contracts::{
    ConnectionState, ContractError, DeviceDescriptor, FrameEnvelope, RigBlueprint, SensorKind,
    StateError, StreamKey, StreamKind, SupervisorConfig, TransportConfig, WorkerCommand,
    WorkerEvent, WorkerSettings,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use transport::{FrameQueue, OverflowPolicy, RecordingReceiver, RecordingSource};

use crate::error::{Result, SupervisorError};
use crate::handle::{lock, DetachReport, Shared, StreamStats, SupervisorEvent, WorkerHandle, WorkerInfo};
use crate::launcher::{ProcessLauncher, WorkerLauncher};

const EVENT_CAPACITY: usize = 64;

/// Frames emitted per stream during one streaming run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSummary {
    pub sensor: SensorKind,
    pub emitted: BTreeMap<StreamKind, u64>,
}

pub struct AcquisitionSupervisor {
    blueprint: RigBlueprint,
    launcher: Arc<dyn WorkerLauncher>,
    handles: BTreeMap<SensorKind, WorkerHandle>,
    events: broadcast::Sender<SupervisorEvent>,
    /// 所有 worker 的采集时钟以此为零点
    epoch: Instant,
}

impl AcquisitionSupervisor {
    pub fn new(blueprint: RigBlueprint, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            blueprint,
            launcher,
            handles: BTreeMap::new(),
            events,
            epoch: Instant::now(),
        }
    }

    /// Supervisor launching one OS process per sensor
    ///
    /// Uses `supervisor.worker_program` when set, the running executable otherwise.
    pub fn with_process_launcher(blueprint: RigBlueprint) -> Result<Self> {
        let launcher = match &blueprint.supervisor.worker_program {
            Some(program) => ProcessLauncher::new(program),
            None => ProcessLauncher::current_exe().map_err(|e| {
                SupervisorError::launch(SensorKind::Radar, format!("cannot locate executable: {e}"))
            })?,
        };
        Ok(Self::new(blueprint, Arc::new(launcher)))
    }

    fn config(&self) -> &SupervisorConfig {
        &self.blueprint.supervisor
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.blueprint.transport
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    fn worker_settings(&self, sensor: SensorKind) -> WorkerSettings {
        match self.blueprint.sensor(sensor) {
            Some(config) => self.blueprint.worker_settings(config),
            None => WorkerSettings {
                event_capacity: self.blueprint.transport.pipe_capacity,
                poll_interval_ms: self.config().poll_interval_ms,
                device_lock_dir: self.config().device_lock_dir.clone(),
                ..WorkerSettings::new(sensor)
            },
        }
    }

    fn handle_mut(&mut self, sensor: SensorKind) -> Result<&mut WorkerHandle> {
        self.handles
            .get_mut(&sensor)
            .ok_or_else(|| StateError::NotAttached(sensor.to_string()).into())
    }

    fn handle_ref(&self, sensor: SensorKind) -> Result<&WorkerHandle> {
        self.handles
            .get(&sensor)
            .ok_or_else(|| StateError::NotAttached(sensor.to_string()).into())
    }

    /// Launch a worker for `sensor` and connect it to `descriptor`
    ///
    /// On failure the worker is torn down again and nothing stays attached.
    /// Starts streaming right away when `supervisor.autostart_streaming` is set.
    #[instrument(name = "supervisor_attach", skip(self), fields(sensor = %sensor, device = %descriptor))]
    pub async fn attach(
        &mut self,
        sensor: SensorKind,
        descriptor: DeviceDescriptor,
    ) -> Result<WorkerInfo> {
        if self.handles.contains_key(&sensor) {
            return Err(StateError::AlreadyAttached(sensor.to_string()).into());
        }

        let settings = self.worker_settings(sensor);
        let launched = self.launcher.launch(&settings)?;
        let shared = Arc::new(Shared::new(
            sensor,
            &self.blueprint.transport,
            self.events.clone(),
        ));
        shared.set_state(ConnectionState::Connecting);
        let mut handle = WorkerHandle::spawn(launched, descriptor.clone(), shared);

        let timeout = self.config().connect_timeout();
        let connect = WorkerCommand::Connect {
            descriptor,
            clock_anchor_ns: self.epoch.elapsed().as_nanos() as u64,
        };
        let outcome = match handle.request(connect, timeout).await {
            Ok(WorkerEvent::Connected) => Ok(()),
            Ok(WorkerEvent::ConnectFailed(failure)) => Err(failure.error.into()),
            Ok(other) => Err(SupervisorError::UnexpectedReply {
                sensor,
                command: "connect",
                reply: format!("{other:?}"),
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "attach failed");
            handle.terminate(self.config().stop_grace()).await;
            return Err(e);
        }

        handle.shared.set_state(ConnectionState::Connected);
        info!(pid = ?handle.info().pid, "sensor attached");
        self.handles.insert(sensor, handle);

        if self.config().autostart_streaming {
            self.start_streaming(sensor).await?;
        }
        self.handle(sensor)
            .ok_or_else(|| StateError::NotAttached(sensor.to_string()).into())
    }

    /// Attach every sensor listed in the blueprint with its configured device
    pub async fn attach_configured(&mut self) -> Result<Vec<WorkerInfo>> {
        let targets: Vec<_> = self
            .blueprint
            .sensors
            .iter()
            .map(|s| (s.sensor, s.device.clone()))
            .collect();
        let mut attached = Vec::with_capacity(targets.len());
        for (sensor, device) in targets {
            attached.push(self.attach(sensor, device).await?);
        }
        Ok(attached)
    }

    /// Stop and release a sensor
    ///
    /// Pending frames are drained into the queues before the worker exits.
    #[instrument(name = "supervisor_detach", skip(self), fields(sensor = %sensor))]
    pub async fn detach(&mut self, sensor: SensorKind) -> Result<DetachReport> {
        let handle = self
            .handles
            .remove(&sensor)
            .ok_or_else(|| StateError::NotAttached(sensor.to_string()))?;
        Ok(handle.terminate(self.config().stop_grace()).await)
    }

    #[instrument(name = "supervisor_start_streaming", skip(self), fields(sensor = %sensor))]
    pub async fn start_streaming(&mut self, sensor: SensorKind) -> Result<()> {
        let timeout = self.config().connect_timeout();
        let handle = self.handle_mut(sensor)?;
        match handle.shared.state() {
            ConnectionState::Streaming => return Ok(()),
            ConnectionState::Connected => {}
            _ => return Err(StateError::NotConnected(sensor.to_string()).into()),
        }
        match handle.request(WorkerCommand::StartStreaming, timeout).await? {
            WorkerEvent::StreamingStarted => {
                handle.shared.set_state(ConnectionState::Streaming);
                Ok(())
            }
            other => Err(SupervisorError::UnexpectedReply {
                sensor,
                command: "start_streaming",
                reply: format!("{other:?}"),
            }),
        }
    }

    #[instrument(name = "supervisor_stop_streaming", skip(self), fields(sensor = %sensor))]
    pub async fn stop_streaming(&mut self, sensor: SensorKind) -> Result<StreamingSummary> {
        let timeout = self.config().connect_timeout();
        let handle = self.handle_mut(sensor)?;
        match handle.shared.state() {
            ConnectionState::Streaming => {}
            ConnectionState::Connected => {
                return Ok(StreamingSummary {
                    sensor,
                    emitted: BTreeMap::new(),
                })
            }
            _ => return Err(StateError::NotConnected(sensor.to_string()).into()),
        }
        match handle.request(WorkerCommand::StopStreaming, timeout).await? {
            WorkerEvent::StreamingStopped { emitted } => {
                handle.shared.set_state(ConnectionState::Connected);
                Ok(StreamingSummary { sensor, emitted })
            }
            other => Err(SupervisorError::UnexpectedReply {
                sensor,
                command: "stop_streaming",
                reply: format!("{other:?}"),
            }),
        }
    }

    /// Latest frame on the sensor's primary stream (display path)
    pub fn poll(&self, sensor: SensorKind) -> Result<Option<FrameEnvelope>> {
        self.poll_stream(StreamKey {
            sensor,
            stream: sensor.primary_stream(),
        })
    }

    /// Latest frame on one stream, discarding older queued frames
    ///
    /// Fails with `Disconnected` once the worker is gone and the queue is empty.
    pub fn poll_stream(&self, key: StreamKey) -> Result<Option<FrameEnvelope>> {
        let handle = self.handle_ref(key.sensor)?;
        let tap = handle
            .tap(key.stream)
            .ok_or(SupervisorError::UnknownStream(key))?;
        Ok(tap.display_rx.drain_latest()?)
    }

    pub fn connection_state(&self, sensor: SensorKind) -> ConnectionState {
        self.handles
            .get(&sensor)
            .map(|h| h.shared.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn handle(&self, sensor: SensorKind) -> Option<WorkerInfo> {
        self.handles.get(&sensor).map(WorkerHandle::info)
    }

    pub fn attached(&self) -> Vec<SensorKind> {
        self.handles.keys().copied().collect()
    }

    pub fn stream_stats(&self, key: StreamKey) -> Option<StreamStats> {
        self.handles.get(&key.sensor)?.tap(key.stream).map(|t| t.stats())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Detach every sensor
    #[instrument(name = "supervisor_shutdown", skip(self))]
    pub async fn shutdown(&mut self) -> Vec<DetachReport> {
        let grace = self.config().stop_grace();
        let handles = std::mem::take(&mut self.handles);
        let mut reports = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            let sensor = handle.sensor();
            let report = handle.terminate(grace).await;
            info!(sensor = %sensor, graceful = report.graceful, "sensor released");
            reports.push(report);
        }
        reports
    }
}

impl RecordingSource for AcquisitionSupervisor {
    /// Lossless, backpressured subscription to one stream
    ///
    /// At most one live subscription per stream; a subscription whose receiver
    /// was dropped is replaced.
    fn subscribe_for_recording(&self, key: StreamKey) -> std::result::Result<RecordingReceiver, ContractError> {
        let handle = self.handle_ref(key.sensor)?;
        if !handle.shared.state().is_live() {
            return Err(StateError::NotConnected(key.sensor.to_string()).into());
        }
        let tap = handle
            .tap(key.stream)
            .ok_or(SupervisorError::UnknownStream(key))?;

        let mut slot = lock(&tap.recording);
        if slot.as_ref().is_some_and(|existing| !existing.is_closed()) {
            return Err(StateError::AlreadySubscribed(key).into());
        }
        let (tx, rx) = FrameQueue::bounded(
            self.blueprint.transport.recording_capacity.max(1),
            OverflowPolicy::Backpressure,
        );
        *slot = Some(tx);
        info!(stream = %key, "recording subscription opened");
        Ok(RecordingReceiver::new(key, rx))
    }
}

//! DepthColorWorker - 深度/彩色相机采集
//!
//! 每个相机帧产出一对 Color + Depth envelope，二者共享 capture_time 与 sequence。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use contracts::{
    CameraSettings, CaptureClock, DeviceDescriptor, DeviceError, FrameEnvelope, FramePayload,
    SensorKind, StreamKind, WorkerState,
};
use tracing::{info, instrument, trace, warn};

use super::backend::{open_backend, CameraBackend};
use crate::error::Result;
use crate::lock::DeviceLock;
use crate::worker::{require_state, EmittedCounters, SensorWorker};

pub struct DepthColorWorker {
    settings: CameraSettings,
    lock_dir: PathBuf,
    state: WorkerState,
    descriptor: Option<DeviceDescriptor>,
    backend: Option<Box<dyn CameraBackend>>,
    lock: Option<DeviceLock>,
    clock: CaptureClock,
    next_sequence: u64,
    last_frame_at: Instant,
    emitted: EmittedCounters,
}

impl DepthColorWorker {
    pub fn new(settings: CameraSettings, lock_dir: PathBuf) -> Self {
        Self {
            settings,
            lock_dir,
            state: WorkerState::Disconnected,
            descriptor: None,
            backend: None,
            lock: None,
            clock: CaptureClock::local(),
            next_sequence: 0,
            last_frame_at: Instant::now(),
            emitted: EmittedCounters::default(),
        }
    }

    fn descriptor_str(&self) -> String {
        self.descriptor
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    fn fail(&mut self, error: DeviceError) -> DeviceError {
        warn!(device = %self.descriptor_str(), error = %error, "camera entering error state");
        if let Some(backend) = self.backend.as_mut() {
            backend.stop();
        }
        self.state = WorkerState::Error;
        error
    }
}

impl SensorWorker for DepthColorWorker {
    fn sensor(&self) -> SensorKind {
        SensorKind::Camera
    }

    fn state(&self) -> WorkerState {
        self.state
    }

    #[instrument(name = "camera_connect", skip(self, clock), fields(device = %descriptor))]
    fn connect(&mut self, descriptor: &DeviceDescriptor, clock: CaptureClock) -> Result<()> {
        require_state(self.state, WorkerState::Disconnected, "connect", SensorKind::Camera)?;
        self.state = WorkerState::Connecting;

        let claimed = DeviceLock::acquire(&self.lock_dir, descriptor)
            .and_then(|lock| Ok((lock, open_backend(descriptor, &self.settings)?)));
        let (lock, backend) = match claimed {
            Ok(pair) => pair,
            Err(e) => {
                self.state = WorkerState::Disconnected;
                return Err(e.into());
            }
        };

        self.lock = Some(lock);
        self.backend = Some(backend);
        self.descriptor = Some(descriptor.clone());
        self.clock = clock;
        self.state = WorkerState::Connected;
        info!(
            width = self.settings.width,
            height = self.settings.height,
            fps = self.settings.fps,
            "camera connected"
        );
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        require_state(self.state, WorkerState::Connected, "start_streaming", SensorKind::Camera)?;
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.start() {
                return Err(self.fail(e).into());
            }
        }
        self.next_sequence = 0;
        self.last_frame_at = Instant::now();
        self.emitted.reset(SensorKind::Camera);
        self.state = WorkerState::Streaming;
        info!("camera streaming started");
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<BTreeMap<StreamKind, u64>> {
        if self.state == WorkerState::Connected {
            return Ok(BTreeMap::new());
        }
        require_state(self.state, WorkerState::Streaming, "stop_streaming", SensorKind::Camera)?;
        if let Some(backend) = self.backend.as_mut() {
            backend.stop();
        }
        self.state = WorkerState::Connected;
        let emitted = self.emitted.take();
        info!(emitted = ?emitted, "camera streaming stopped");
        Ok(emitted)
    }

    fn disconnect(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.stop();
            info!(device = %self.descriptor_str(), "camera disconnected");
        }
        self.lock = None;
        self.descriptor = None;
        self.state = WorkerState::Disconnected;
    }

    fn poll_frames(
        &mut self,
        timeout: Duration,
        out: &mut Vec<FrameEnvelope>,
    ) -> std::result::Result<(), DeviceError> {
        if self.state != WorkerState::Streaming {
            return Ok(());
        }
        let Some(backend) = self.backend.as_mut() else {
            let descriptor = self.descriptor_str();
            return Err(self.fail(DeviceError::driver(descriptor, "backend closed")));
        };

        match backend.wait_for_frames(timeout) {
            Ok(Some(frame)) => {
                let capture_time = self.clock.now();
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.last_frame_at = Instant::now();
                trace!(sequence, width = frame.color.width, height = frame.color.height, "camera frame");

                out.push(FrameEnvelope {
                    sensor: SensorKind::Camera,
                    stream: StreamKind::Color,
                    capture_time,
                    sequence,
                    payload: FramePayload::Color(frame.color),
                });
                out.push(FrameEnvelope {
                    sensor: SensorKind::Camera,
                    stream: StreamKind::Depth,
                    capture_time,
                    sequence,
                    payload: FramePayload::Depth(frame.depth),
                });
                self.emitted.record(StreamKind::Color);
                self.emitted.record(StreamKind::Depth);
                Ok(())
            }
            Ok(None) => {
                let silent = self.last_frame_at.elapsed();
                if silent >= Duration::from_millis(self.settings.stall_timeout_ms) {
                    let descriptor = self.descriptor_str();
                    return Err(self.fail(DeviceError::Stalled {
                        descriptor,
                        silent_ms: silent.as_millis() as u64,
                    }));
                }
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;

    fn settings() -> CameraSettings {
        CameraSettings {
            width: 16,
            height: 8,
            fps: 200,
            ..CameraSettings::default()
        }
    }

    #[test]
    fn test_pairs_share_time_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = DepthColorWorker::new(settings(), dir.path().to_path_buf());
        worker.connect(&"synthetic:cam".into(), CaptureClock::local()).unwrap();
        worker.start_streaming().unwrap();

        let mut frames = Vec::new();
        while frames.len() < 6 {
            worker.poll_frames(Duration::from_millis(50), &mut frames).unwrap();
        }
        for pair in frames.chunks(2) {
            assert_eq!(pair[0].stream, StreamKind::Color);
            assert_eq!(pair[1].stream, StreamKind::Depth);
            assert_eq!(pair[0].capture_time, pair[1].capture_time);
            assert_eq!(pair[0].sequence, pair[1].sequence);
        }
        assert_eq!(frames[4].sequence, 2);

        let emitted = worker.stop_streaming().unwrap();
        assert_eq!(emitted[&StreamKind::Color], 3);
        assert_eq!(emitted[&StreamKind::Depth], 3);
    }

    #[test]
    fn test_vendor_descriptor_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = DepthColorWorker::new(settings(), dir.path().to_path_buf());
        let err = worker.connect(&"817612070457".into(), CaptureClock::local()).unwrap_err();
        assert!(matches!(err, WorkerError::Device(DeviceError::NotFound { .. })));
        assert_eq!(worker.state(), WorkerState::Disconnected);
    }

    #[test]
    fn test_silent_camera_stalls() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = DepthColorWorker::new(
            CameraSettings {
                synthetic_frame_limit: Some(0),
                stall_timeout_ms: 30,
                ..settings()
            },
            dir.path().to_path_buf(),
        );
        worker.connect(&"synthetic:cam".into(), CaptureClock::local()).unwrap();
        worker.start_streaming().unwrap();
        let mut frames = Vec::new();
        let err = loop {
            if let Err(e) = worker.poll_frames(Duration::from_millis(10), &mut frames) {
                break e;
            }
        };
        assert!(matches!(err, DeviceError::Stalled { .. }));
        assert_eq!(worker.state(), WorkerState::Error);
        assert!(frames.is_empty());
    }
}

//! RadarWorker - 串口雷达采集

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use contracts::{
    CaptureClock, DeviceDescriptor, DeviceError, FrameEnvelope, FramePayload, PointCloudFrame,
    RadarSettings, SensorKind, StreamKind, WorkerState,
};
use tracing::{debug, info, instrument, trace, warn};

use super::link::{RadarLink, SerialLink, SyntheticRadarLink};
use super::protocol::{PacketParser, RadarPacket};
use crate::error::Result;
use crate::lock::DeviceLock;
use crate::worker::{require_state, EmittedCounters, SensorWorker};

const READ_CHUNK: usize = 4096;

pub struct RadarWorker {
    settings: RadarSettings,
    lock_dir: PathBuf,
    state: WorkerState,
    descriptor: Option<DeviceDescriptor>,
    link: Option<Box<dyn RadarLink>>,
    lock: Option<DeviceLock>,
    parser: PacketParser,
    clock: CaptureClock,
    /// Device frame number that maps to sequence 0
    first_frame: Option<u32>,
    last_frame: Option<u32>,
    last_packet_at: Instant,
    emitted: EmittedCounters,
    read_buf: Vec<u8>,
}

impl RadarWorker {
    pub fn new(settings: RadarSettings, lock_dir: PathBuf) -> Self {
        Self {
            settings,
            lock_dir,
            state: WorkerState::Disconnected,
            descriptor: None,
            link: None,
            lock: None,
            parser: PacketParser::new(),
            clock: CaptureClock::local(),
            first_frame: None,
            last_frame: None,
            last_packet_at: Instant::now(),
            emitted: EmittedCounters::default(),
            read_buf: vec![0u8; READ_CHUNK],
        }
    }

    fn open_link(&self, descriptor: &DeviceDescriptor) -> std::result::Result<Box<dyn RadarLink>, DeviceError> {
        match descriptor.synthetic_name() {
            Some(name) => {
                debug!(name, "using synthetic radar link");
                Ok(Box::new(SyntheticRadarLink::new(&self.settings)))
            }
            None => Ok(Box::new(SerialLink::open(descriptor.as_str(), &self.settings)?)),
        }
    }

    fn descriptor_str(&self) -> String {
        self.descriptor
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    fn fail(&mut self, error: DeviceError) -> DeviceError {
        warn!(device = %self.descriptor_str(), error = %error, "radar entering error state");
        self.state = WorkerState::Error;
        error
    }

    /// Map a device frame to an envelope, or `None` if it does not advance the stream
    fn to_envelope(&mut self, packet: RadarPacket) -> Option<FrameEnvelope> {
        let capture_time = self.clock.now();
        if let Some(last) = self.last_frame {
            if packet.frame_number <= last {
                warn!(
                    frame = packet.frame_number,
                    last, "radar frame counter went backwards, dropping frame"
                );
                return None;
            }
        }
        let first = *self.first_frame.get_or_insert(packet.frame_number);
        self.last_frame = Some(packet.frame_number);
        let sequence = u64::from(packet.frame_number - first);

        let envelope = FrameEnvelope {
            sensor: SensorKind::Radar,
            stream: StreamKind::PointCloud,
            capture_time,
            sequence,
            payload: FramePayload::PointCloud(PointCloudFrame::new(packet.points)),
        };
        self.emitted.record(StreamKind::PointCloud);
        Some(envelope)
    }
}

impl SensorWorker for RadarWorker {
    fn sensor(&self) -> SensorKind {
        SensorKind::Radar
    }

    fn state(&self) -> WorkerState {
        self.state
    }

    #[instrument(name = "radar_connect", skip(self, clock), fields(device = %descriptor))]
    fn connect(&mut self, descriptor: &DeviceDescriptor, clock: CaptureClock) -> Result<()> {
        require_state(self.state, WorkerState::Disconnected, "connect", SensorKind::Radar)?;
        self.state = WorkerState::Connecting;

        let claimed = DeviceLock::acquire(&self.lock_dir, descriptor)
            .and_then(|lock| Ok((lock, self.open_link(descriptor)?)));
        let (lock, link) = match claimed {
            Ok(pair) => pair,
            Err(e) => {
                self.state = WorkerState::Disconnected;
                return Err(e.into());
            }
        };

        self.lock = Some(lock);
        self.link = Some(link);
        self.descriptor = Some(descriptor.clone());
        self.clock = clock;
        self.state = WorkerState::Connected;
        info!("radar connected");
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        require_state(self.state, WorkerState::Connected, "start_streaming", SensorKind::Radar)?;
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.discard_input() {
                debug!(error = %e, "could not flush stale radar input");
            }
        }
        self.parser.reset();
        self.first_frame = None;
        self.last_frame = None;
        self.last_packet_at = Instant::now();
        self.emitted.reset(SensorKind::Radar);
        self.state = WorkerState::Streaming;
        info!("radar streaming started");
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<BTreeMap<StreamKind, u64>> {
        if self.state == WorkerState::Connected {
            return Ok(BTreeMap::new());
        }
        require_state(self.state, WorkerState::Streaming, "stop_streaming", SensorKind::Radar)?;
        self.state = WorkerState::Connected;
        let emitted = self.emitted.take();
        let stats = self.parser.stats();
        info!(
            emitted = ?emitted,
            malformed = stats.errors,
            discarded_bytes = stats.discarded_bytes,
            "radar streaming stopped"
        );
        Ok(emitted)
    }

    fn disconnect(&mut self) {
        if self.state != WorkerState::Disconnected {
            info!(device = %self.descriptor_str(), "radar disconnected");
        }
        self.link = None;
        self.lock = None;
        self.descriptor = None;
        self.parser.reset();
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
        let deadline = Instant::now() + timeout;
        loop {
            let Some(link) = self.link.as_mut() else {
                let descriptor = self.descriptor_str();
                return Err(self.fail(DeviceError::driver(descriptor, "link closed")));
            };
            let n = match link.read(&mut self.read_buf) {
                Ok(n) => n,
                Err(e) => {
                    let descriptor = self.descriptor_str();
                    return Err(self.fail(DeviceError::driver(descriptor, e.to_string())));
                }
            };
            self.parser.push(&self.read_buf[..n]);

            let before = out.len();
            while let Some(result) = self.parser.next_packet() {
                match result {
                    Ok(packet) => {
                        self.last_packet_at = Instant::now();
                        trace!(frame = packet.frame_number, points = packet.points.len(), "radar packet");
                        if let Some(envelope) = self.to_envelope(packet) {
                            out.push(envelope);
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed radar packet dropped"),
                }
            }
            if out.len() > before {
                return Ok(());
            }

            let silent = self.last_packet_at.elapsed();
            if silent >= self.settings.stall_timeout() {
                let descriptor = self.descriptor_str();
                return Err(self.fail(DeviceError::Stalled {
                    descriptor,
                    silent_ms: silent.as_millis() as u64,
                }));
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StateError;
    use crate::error::WorkerError;

    fn settings() -> RadarSettings {
        RadarSettings {
            synthetic_frame_interval_ms: 2,
            read_timeout_ms: 5,
            synthetic_points: 4,
            synthetic_frame_limit: Some(6),
            synthetic_corrupt_frames: vec![4],
            stall_timeout_ms: 300,
            ..RadarSettings::default()
        }
    }

    fn collect_until_stall(worker: &mut RadarWorker) -> (Vec<FrameEnvelope>, DeviceError) {
        let mut frames = Vec::new();
        loop {
            if let Err(e) = worker.poll_frames(Duration::from_millis(20), &mut frames) {
                return (frames, e);
            }
        }
    }

    #[test]
    fn test_corrupt_frame_leaves_sequence_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = RadarWorker::new(settings(), dir.path().to_path_buf());
        worker
            .connect(&"synthetic:radar".into(), CaptureClock::local())
            .unwrap();
        worker.start_streaming().unwrap();

        let (frames, err) = collect_until_stall(&mut worker);
        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 4, 5]);
        assert!(frames.windows(2).all(|w| w[0].capture_time <= w[1].capture_time));
        assert!(matches!(err, DeviceError::Stalled { .. }));
        assert_eq!(worker.state(), WorkerState::Error);

        // only disconnect is accepted from Error
        assert!(matches!(
            worker.start_streaming(),
            Err(WorkerError::State(StateError::InvalidTransition { .. }))
        ));
        worker.disconnect();
        assert_eq!(worker.state(), WorkerState::Disconnected);
    }

    #[test]
    fn test_stop_reports_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = RadarWorker::new(
            RadarSettings {
                synthetic_corrupt_frames: vec![],
                ..settings()
            },
            dir.path().to_path_buf(),
        );
        worker
            .connect(&"synthetic:radar".into(), CaptureClock::local())
            .unwrap();
        worker.start_streaming().unwrap();
        let mut frames = Vec::new();
        while frames.len() < 3 {
            worker.poll_frames(Duration::from_millis(20), &mut frames).unwrap();
        }
        let emitted = worker.stop_streaming().unwrap();
        assert_eq!(emitted[&StreamKind::PointCloud], frames.len() as u64);
        assert_eq!(worker.state(), WorkerState::Connected);
    }

    #[test]
    fn test_start_requires_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = RadarWorker::new(settings(), dir.path().to_path_buf());
        assert!(matches!(
            worker.start_streaming(),
            Err(WorkerError::State(StateError::NotConnected(_)))
        ));
    }

    #[test]
    fn test_busy_device_stays_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let _held = DeviceLock::acquire(dir.path(), &"COM3".into()).unwrap();
        let mut worker = RadarWorker::new(settings(), dir.path().to_path_buf());
        let err = worker.connect(&"COM3".into(), CaptureClock::local()).unwrap_err();
        assert!(matches!(err, WorkerError::Device(DeviceError::Busy { .. })));
        assert_eq!(worker.state(), WorkerState::Disconnected);
    }
}

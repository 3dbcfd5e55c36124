//! Radar byte links: the UART data port or a synthetic packet generator

use std::f32::consts::PI;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use contracts::{DeviceError, RadarPoint, RadarSettings};
use tracing::debug;

use super::protocol::{encode_packet, HEADER_LEN};

/// Source of raw radar bytes
pub trait RadarLink: Send {
    /// Read available bytes; `Ok(0)` when nothing arrived within the read timeout
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drop whatever the device sent while nobody was listening
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Serial data port
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    pub fn open(path: &str, settings: &RadarSettings) -> Result<Self, DeviceError> {
        let port = serialport::new(path, settings.baud_rate)
            .timeout(Duration::from_millis(settings.read_timeout_ms))
            .open()
            .map_err(|e| map_serial_error(path, e))?;
        debug!(port = path, baud = settings.baud_rate, "serial port opened");
        Ok(Self { port })
    }
}

impl RadarLink for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

fn map_serial_error(path: &str, e: serialport::Error) -> DeviceError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => DeviceError::not_found(path),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => DeviceError::not_found(path),
        serialport::ErrorKind::Io(io::ErrorKind::ResourceBusy) => DeviceError::busy(path),
        // Windows reports an already-open COM port as access denied
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) if cfg!(windows) => {
            DeviceError::busy(path)
        }
        _ => DeviceError::driver(path, e.to_string()),
    }
}

/// Generates TI packets at a fixed frame interval
///
/// Device frame numbers start at 1. Frames listed in `corrupt_frames` go out
/// with a broken TLV length; after `frame_limit` frames the link goes silent.
pub struct SyntheticRadarLink {
    interval: Duration,
    read_timeout: Duration,
    points_per_frame: usize,
    corrupt_frames: Vec<u64>,
    frame_limit: Option<u64>,
    next_frame: u64,
    next_due: Option<Instant>,
    pending: Vec<u8>,
}

impl SyntheticRadarLink {
    pub fn new(settings: &RadarSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.synthetic_frame_interval_ms.max(1)),
            read_timeout: Duration::from_millis(settings.read_timeout_ms.max(1)),
            points_per_frame: settings.synthetic_points,
            corrupt_frames: settings.synthetic_corrupt_frames.clone(),
            frame_limit: settings.synthetic_frame_limit,
            next_frame: 1,
            next_due: None,
            pending: Vec::new(),
        }
    }

    fn exhausted(&self) -> bool {
        self.frame_limit
            .is_some_and(|limit| self.next_frame > limit)
    }

    /// Points on a slowly rotating ring, so replayed clouds visibly move
    fn frame_points(&self, frame: u64) -> Vec<RadarPoint> {
        let phase = frame as f32 * 0.05;
        (0..self.points_per_frame)
            .map(|i| {
                let angle = phase + 2.0 * PI * i as f32 / self.points_per_frame.max(1) as f32;
                let range = 4.0 + (i % 5) as f32 * 0.5;
                let mut p = RadarPoint::from_spherical(range, angle.sin() * 60.0, (i % 3) as f32 * 5.0 - 5.0);
                p.velocity = Some(angle.cos());
                p.intensity = Some(10.0 + (i % 7) as f32);
                p
            })
            .collect()
    }

    fn generate(&mut self) {
        let frame = self.next_frame;
        let mut packet = encode_packet(frame as u32, &self.frame_points(frame));
        if self.corrupt_frames.contains(&frame) {
            packet[HEADER_LEN + 4..HEADER_LEN + 8].copy_from_slice(&u32::MAX.to_le_bytes());
        }
        self.pending.extend_from_slice(&packet);
        self.next_frame += 1;
    }
}

impl RadarLink for SyntheticRadarLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            if self.exhausted() {
                std::thread::sleep(self.read_timeout);
                return Ok(0);
            }
            let now = Instant::now();
            let due = *self.next_due.get_or_insert(now);
            if due > now {
                let wait = (due - now).min(self.read_timeout);
                std::thread::sleep(wait);
                if Instant::now() < due {
                    return Ok(0);
                }
            }
            self.generate();
            self.next_due = Some(due + self.interval);
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.next_due = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::protocol::PacketParser;

    fn fast_settings() -> RadarSettings {
        RadarSettings {
            synthetic_frame_interval_ms: 1,
            read_timeout_ms: 5,
            synthetic_points: 3,
            synthetic_frame_limit: Some(4),
            synthetic_corrupt_frames: vec![2],
            ..RadarSettings::default()
        }
    }

    #[test]
    fn test_synthetic_link_produces_frames_then_goes_silent() {
        let mut link = SyntheticRadarLink::new(&fast_settings());
        let mut parser = PacketParser::new();
        let mut buf = [0u8; 64];
        let mut good = Vec::new();
        let mut bad = 0;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let n = link.read(&mut buf).unwrap();
            if n == 0 && link.exhausted() {
                break;
            }
            parser.push(&buf[..n]);
            while let Some(result) = parser.next_packet() {
                match result {
                    Ok(packet) => good.push(packet.frame_number),
                    Err(_) => bad += 1,
                }
            }
        }
        assert_eq!(good, vec![1, 3, 4]);
        assert_eq!(bad, 1);
        assert_eq!(link.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_missing_serial_port_is_not_found() {
        let err = SerialLink::open("/dev/definitely-not-a-radar", &RadarSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::NotFound { .. } | DeviceError::Driver { .. }));
    }
}

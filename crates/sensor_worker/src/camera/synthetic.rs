//! Synthetic depth/color camera
//!
//! Produces a moving gradient (color) and a tilted plane (depth) at the
//! configured rate.

use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{
    CameraSettings, ColorImage, DepthFormat, DepthImage, DeviceError, PixelFormat,
};

use super::backend::{CameraBackend, CameraFrame};

pub struct SyntheticCamera {
    settings: CameraSettings,
    running: bool,
    produced: u64,
    next_due: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            running: false,
            produced: 0,
            next_due: None,
        }
    }

    fn resolution(&self) -> (u32, u32) {
        match self.settings.synthetic_resolution_change {
            Some(change) if self.produced >= change.after_frames => (change.width, change.height),
            _ => (self.settings.width, self.settings.height),
        }
    }

    fn render(&self) -> Result<CameraFrame, DeviceError> {
        let (width, height) = self.resolution();
        let shift = (self.produced * 4) as u32;

        let mut bgr = Vec::with_capacity(width as usize * height as usize * 3);
        for row in 0..height {
            for col in 0..width {
                bgr.push(((col + shift) % 256) as u8);
                bgr.push(((row + shift / 2) % 256) as u8);
                bgr.push(((col + row) % 256) as u8);
            }
        }

        // plane from 1 m at the top to ~3 m at the bottom, in millimetres
        let mut depth = Vec::with_capacity(width as usize * height as usize * 2);
        for row in 0..height {
            let mm = 1000 + (2000 * row / height.max(1)) as u16;
            for _ in 0..width {
                depth.extend_from_slice(&mm.to_le_bytes());
            }
        }

        let invalid = |e: contracts::ContractError| DeviceError::driver("synthetic", e.to_string());
        Ok(CameraFrame {
            color: ColorImage::new(width, height, PixelFormat::Bgr8, Bytes::from(bgr)).map_err(invalid)?,
            depth: DepthImage::new(
                width,
                height,
                DepthFormat::U16,
                self.settings.depth_scale,
                Bytes::from(depth),
            )
            .map_err(invalid)?,
        })
    }
}

impl CameraBackend for SyntheticCamera {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.running = true;
        self.next_due = None;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<CameraFrame>, DeviceError> {
        if !self.running {
            return Err(DeviceError::driver("synthetic", "pipeline not started"));
        }
        if self
            .settings
            .synthetic_frame_limit
            .is_some_and(|limit| self.produced >= limit)
        {
            std::thread::sleep(timeout);
            return Ok(None);
        }

        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        let frame = self.render()?;
        self.produced += 1;
        self.next_due = Some(due + self.settings.frame_interval());
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ResolutionChange;

    #[test]
    fn test_resolution_change_after_n_frames() {
        let mut camera = SyntheticCamera::new(CameraSettings {
            width: 8,
            height: 6,
            fps: 1000,
            synthetic_resolution_change: Some(ResolutionChange {
                after_frames: 2,
                width: 16,
                height: 12,
            }),
            ..CameraSettings::default()
        });
        camera.start().unwrap();
        let mut sizes = Vec::new();
        while sizes.len() < 3 {
            if let Some(frame) = camera.wait_for_frames(Duration::from_millis(50)).unwrap() {
                assert_eq!(
                    (frame.color.width, frame.color.height),
                    (frame.depth.width, frame.depth.height)
                );
                sizes.push((frame.color.width, frame.color.height));
            }
        }
        assert_eq!(sizes, vec![(8, 6), (8, 6), (16, 12)]);
    }

    #[test]
    fn test_frame_limit_goes_silent() {
        let mut camera = SyntheticCamera::new(CameraSettings {
            width: 4,
            height: 4,
            fps: 1000,
            synthetic_frame_limit: Some(1),
            ..CameraSettings::default()
        });
        camera.start().unwrap();
        assert!(camera.wait_for_frames(Duration::from_millis(50)).unwrap().is_some());
        assert!(camera.wait_for_frames(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn test_depth_plane_in_metres() {
        let camera = SyntheticCamera::new(CameraSettings {
            width: 4,
            height: 4,
            ..CameraSettings::default()
        });
        let frame = camera.render().unwrap();
        assert_eq!(frame.depth.distance_m(0, 0), Some(1.0));
    }
}

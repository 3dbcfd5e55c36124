//! Intel RealSense backend (`realsense` feature, needs librealsense2)
//!
//! The pipeline lives on its own thread because the SDK handles are not
//! `Send`; frames cross over a small bounded channel. Depth is aligned to the
//! color stream, so both images of a pair share the color pixel grid.

use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::fmt::Display;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use contracts::{CameraSettings, ColorImage, DepthFormat, DepthImage, DeviceError, PixelFormat};
use realsense_rust::config::Config;
use realsense_rust::context::Context;
use realsense_rust::frame::{ColorFrame, DepthFrame};
use realsense_rust::kind::{Rs2CameraInfo, Rs2Format, Rs2StreamKind};
use realsense_rust::pipeline::{ActivePipeline, FrameWaitError, InactivePipeline};
use realsense_rust::processing_blocks::align::Align;
use tracing::{debug, info, warn};

use super::backend::{CameraBackend, CameraFrame};

/// Poll period of the pipeline thread, bounds how long `stop` waits
const POLL: Duration = Duration::from_millis(100);

type FrameResult = Result<CameraFrame, DeviceError>;

fn driver<E: Display>(descriptor: &str) -> impl Fn(E) -> DeviceError + '_ {
    move |e| DeviceError::driver(descriptor, e.to_string())
}

/// Copy `height` rows of `row_bytes` out of a buffer with `stride` bytes per row
pub(crate) fn pack_rows(data: &[u8], row_bytes: usize, stride: usize, height: usize) -> Option<Vec<u8>> {
    if stride < row_bytes || data.len() < stride * height.saturating_sub(1) + row_bytes {
        return None;
    }
    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        packed.extend_from_slice(&data[start..start + row_bytes]);
    }
    Some(packed)
}

struct PipelineThread {
    stop: Arc<AtomicBool>,
    frames: Receiver<FrameResult>,
    handle: JoinHandle<()>,
}

pub struct RealSenseCamera {
    descriptor: String,
    serial: Option<CString>,
    settings: CameraSettings,
    pipeline: Option<PipelineThread>,
}

impl RealSenseCamera {
    /// Check that the device is present; streaming starts with [`CameraBackend::start`]
    pub fn open(descriptor: &str, serial: &str, settings: &CameraSettings) -> Result<Self, DeviceError> {
        let serial = if serial.is_empty() {
            None
        } else {
            Some(CString::new(serial).map_err(driver(descriptor))?)
        };
        let context = Context::new().map_err(driver(descriptor))?;
        let devices = context.query_devices(HashSet::new());
        let found = devices.iter().any(|device| match &serial {
            None => true,
            Some(wanted) => device
                .info(Rs2CameraInfo::SerialNumber)
                .is_some_and(|s: &CStr| s == wanted.as_c_str()),
        });
        if !found {
            return Err(DeviceError::not_found(descriptor));
        }
        info!(device = descriptor, candidates = devices.len(), "realsense device found");
        Ok(Self {
            descriptor: descriptor.to_string(),
            serial,
            settings: settings.clone(),
            pipeline: None,
        })
    }
}

impl CameraBackend for RealSenseCamera {
    fn start(&mut self) -> Result<(), DeviceError> {
        if self.pipeline.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frames) = mpsc::sync_channel(2);
        let (ready_tx, ready) = mpsc::sync_channel(1);
        let thread = {
            let descriptor = self.descriptor.clone();
            let serial = self.serial.clone();
            let settings = self.settings.clone();
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("realsense".into())
                .spawn(move || run_pipeline(&descriptor, serial, &settings, &stop, ready_tx, frame_tx))
                .map_err(driver(&self.descriptor))?
        };
        match ready.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(DeviceError::driver(&self.descriptor, "pipeline thread exited during start"));
            }
        }
        self.pipeline = Some(PipelineThread {
            stop,
            frames,
            handle: thread,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop.store(true, Ordering::Release);
            // unblock a pending send
            drop(pipeline.frames);
            if pipeline.handle.join().is_err() {
                warn!(device = %self.descriptor, "realsense pipeline thread panicked");
            }
        }
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<CameraFrame>, DeviceError> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(DeviceError::driver(&self.descriptor, "pipeline not started"));
        };
        match pipeline.frames.recv_timeout(timeout) {
            Ok(frame) => frame.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(DeviceError::driver(&self.descriptor, "pipeline thread ended"))
            }
        }
    }
}

impl Drop for RealSenseCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

fn start_pipeline(
    descriptor: &str,
    serial: Option<&CStr>,
    settings: &CameraSettings,
) -> Result<(Context, ActivePipeline, Align), DeviceError> {
    let context = Context::new().map_err(driver(descriptor))?;
    let inactive = InactivePipeline::try_from(&context).map_err(driver(descriptor))?;
    let (width, height, fps) = (
        settings.width as usize,
        settings.height as usize,
        settings.fps as usize,
    );
    let mut config = Config::new();
    if let Some(serial) = serial {
        config
            .enable_device_from_serial(serial)
            .map_err(driver(descriptor))?;
    }
    config
        .disable_all_streams()
        .map_err(driver(descriptor))?
        .enable_stream(Rs2StreamKind::Color, None, width, height, Rs2Format::Bgr8, fps)
        .map_err(driver(descriptor))?
        .enable_stream(Rs2StreamKind::Depth, None, width, height, Rs2Format::Z16, fps)
        .map_err(driver(descriptor))?;
    let active = inactive.start(Some(config)).map_err(driver(descriptor))?;
    let align = Align::new(Rs2StreamKind::Color, 1).map_err(driver(descriptor))?;
    Ok((context, active, align))
}

fn run_pipeline(
    descriptor: &str,
    serial: Option<CString>,
    settings: &CameraSettings,
    stop: &AtomicBool,
    ready: SyncSender<Result<(), DeviceError>>,
    frames: SyncSender<FrameResult>,
) {
    let started = start_pipeline(descriptor, serial.as_deref(), settings);
    let (_context, mut active, mut align) = match started {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    info!(device = descriptor, "realsense pipeline started");

    while !stop.load(Ordering::Acquire) {
        let composite = match active.wait(Some(POLL)) {
            Ok(composite) => composite,
            Err(FrameWaitError::DidTimeoutBeforeFrameArrival) => continue,
            Err(e) => {
                let _ = frames.send(Err(DeviceError::driver(descriptor, e.to_string())));
                break;
            }
        };
        let aligned = align
            .queue(composite)
            .map_err(driver(descriptor))
            .and_then(|()| align.wait(POLL).map_err(driver(descriptor)));
        let pair = aligned.and_then(|aligned| {
            let color = aligned.frames_of_type::<ColorFrame>();
            let depth = aligned.frames_of_type::<DepthFrame>();
            match (color.first(), depth.first()) {
                (Some(color), Some(depth)) => to_camera_frame(descriptor, settings, color, depth).map(Some),
                _ => Ok(None),
            }
        });
        let pair = match pair {
            Ok(Some(pair)) => Ok(pair),
            Ok(None) => {
                debug!("incomplete frameset skipped");
                continue;
            }
            Err(e) => Err(e),
        };
        let failed = pair.is_err();
        if frames.send(pair).is_err() || failed {
            break;
        }
    }
    active.stop();
    info!(device = descriptor, "realsense pipeline stopped");
}

/// # Safety
/// `data` must point to `size` readable bytes that live at least as long as `'a`
unsafe fn raw_bytes<'a>(data: &'a c_void, size: usize) -> &'a [u8] {
    std::slice::from_raw_parts((data as *const c_void).cast::<u8>(), size)
}

fn to_camera_frame(
    descriptor: &str,
    settings: &CameraSettings,
    color: &ColorFrame,
    depth: &DepthFrame,
) -> Result<CameraFrame, DeviceError> {
    let invalid = |what: &str| DeviceError::driver(descriptor, format!("malformed {what} frame"));

    let (width, height) = (color.width(), color.height());
    // SAFETY: pointer and size describe the frame's own buffer, borrowed with the frame
    let color_data = unsafe { raw_bytes(color.get_data(), color.get_data_size()) };
    let bgr = pack_rows(color_data, width * 3, color.stride(), height).ok_or_else(|| invalid("color"))?;

    let (depth_width, depth_height) = (depth.width(), depth.height());
    // SAFETY: as above
    let depth_data = unsafe { raw_bytes(depth.get_data(), depth.get_data_size()) };
    let z16 = pack_rows(depth_data, depth_width * 2, depth.stride(), depth_height)
        .ok_or_else(|| invalid("depth"))?;

    let contract = |e: contracts::ContractError| DeviceError::driver(descriptor, e.to_string());
    Ok(CameraFrame {
        color: ColorImage::new(width as u32, height as u32, PixelFormat::Bgr8, Bytes::from(bgr))
            .map_err(contract)?,
        depth: DepthImage::new(
            depth_width as u32,
            depth_height as u32,
            DepthFormat::U16,
            settings.depth_scale,
            Bytes::from(z16),
        )
        .map_err(contract)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rows_drops_stride_padding() {
        let data = [1, 2, 3, 0, 4, 5, 6, 0];
        assert_eq!(pack_rows(&data, 3, 4, 2), Some(vec![1, 2, 3, 4, 5, 6]));
        // last row needs no padding
        assert_eq!(pack_rows(&data[..7], 3, 4, 2), Some(vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(pack_rows(&data[..6], 3, 4, 2), None);
        assert_eq!(pack_rows(&data, 4, 3, 2), None);
    }
}

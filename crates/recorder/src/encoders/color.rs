//! Color → H.264 via an external ffmpeg process (`color.mp4`)
//!
//! Raw frames are piped to ffmpeg's stdin. The process is started with the
//! first frame because the output resolution is only known then.
//!
//! The container runs at a fixed rate, so every frame is mapped to the output
//! slot nearest its capture time (relative to the first frame). A frame stays
//! held until the next one arrives:
//! - next frame lands in a later slot: the held frame is piped once per slot
//!   it covers, which fills capture gaps with repeats
//! - next frame lands in the same slot: the held frame is merged away and
//!   indexed with `repeats = 0`
//!
//! This keeps the played-back duration equal to the capture duration whatever
//! rate the camera actually delivers.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytes::Bytes;
use contracts::{
    ColorEncoderConfig, ColorImage, EncodingError, FrameEncoder, FrameEnvelope, FramePayload,
    PixelFormat,
};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use super::index::{FrameIndex, IndexEntry};

pub const COLOR_FILE: &str = "color.mp4";
pub const COLOR_INDEX_FILE: &str = "color.frames.jsonl";

const NAME: &str = "color";

/// Upper bound of repeated frames inserted for a single gap
const MAX_FILL_SECONDS: u32 = 2;

/// Output slot of a frame captured `offset_ns` after the first one
pub fn slot_of(offset_ns: u64, interval_ns: u64) -> u64 {
    if interval_ns == 0 {
        return 0;
    }
    (offset_ns + interval_ns / 2) / interval_ns
}

struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Frame waiting for its repeat count
struct HeldFrame {
    data: Bytes,
    entry: IndexEntry,
    slot: u64,
}

pub struct ColorEncoder {
    path: PathBuf,
    config: ColorEncoderConfig,
    index: FrameIndex,
    process: Option<FfmpegProcess>,
    /// Capture time of output slot 0
    origin_ns: Option<u64>,
    held: Option<HeldFrame>,
    frames_written: u64,
    merged_frames: u64,
    video_frames: u64,
    closed: bool,
}

impl ColorEncoder {
    pub fn create(dir: &Path, config: &ColorEncoderConfig) -> Result<Self, EncodingError> {
        let index = FrameIndex::create(&dir.join(COLOR_INDEX_FILE))
            .map_err(|e| EncodingError::io(NAME, e))?;
        Ok(Self {
            path: dir.join(COLOR_FILE),
            config: config.clone(),
            index,
            process: None,
            origin_ns: None,
            held: None,
            frames_written: 0,
            merged_frames: 0,
            video_frames: 0,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames emitted into the container so far, repeats included
    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    fn fps(&self) -> u32 {
        self.config.fps_or_default()
    }

    fn frame_interval_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.fps())
    }

    fn spawn(&self, image: &ColorImage) -> Result<FfmpegProcess, EncodingError> {
        let size = format!("{}x{}", image.width, image.height);
        let fps = self.fps().to_string();
        let crf = self.config.crf.to_string();
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .args(["-hide_banner", "-loglevel", "error", "-nostats", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", image.format.ffmpeg_name()])
            .args(["-s", size.as_str(), "-framerate", fps.as_str(), "-i", "-"])
            .args(["-an", "-c:v", self.config.codec.as_str()])
            .args(["-preset", self.config.preset.as_str(), "-crf", crf.as_str()])
            .args(["-pix_fmt", "yuv420p"])
            .arg(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            EncodingError::encoder(
                NAME,
                format!("failed to start {}: {e}", self.config.ffmpeg_path.display()),
            )
        })?;
        let stdin = child.stdin.take();
        if stdin.is_none() {
            return Err(EncodingError::encoder(NAME, "ffmpeg stdin unavailable"));
        }
        info!(
            size = %size,
            fps = self.fps(),
            codec = %self.config.codec,
            output = %self.path.display(),
            "ffmpeg encoder started"
        );
        Ok(FfmpegProcess {
            child,
            stdin,
            width: image.width,
            height: image.height,
            format: image.format,
        })
    }

    async fn pipe(&mut self, data: &[u8]) -> Result<(), EncodingError> {
        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| EncodingError::Closed {
                encoder: NAME.to_string(),
            })?;
        stdin
            .write_all(data)
            .await
            .map_err(|e| EncodingError::encoder(NAME, format!("ffmpeg pipe: {e}")))?;
        self.video_frames += 1;
        Ok(())
    }

    /// Emits the held frame `repeats` times and indexes it
    async fn release(&mut self, mut held: HeldFrame, repeats: u32) -> Result<(), EncodingError> {
        for _ in 0..repeats {
            self.pipe(&held.data).await?;
        }
        held.entry.repeats = repeats;
        self.index
            .append(&held.entry)
            .map_err(|e| EncodingError::io(NAME, e))
    }

    /// Slot for a capture time; long gaps move the origin so they are capped
    fn place(&mut self, capture_ns: u64, held_slot: Option<u64>) -> u64 {
        let interval = self.frame_interval_ns();
        let origin = *self.origin_ns.get_or_insert(capture_ns);
        let slot = slot_of(capture_ns.saturating_sub(origin), interval);
        let Some(held_slot) = held_slot else {
            return slot;
        };
        let max_step = u64::from(self.fps() * MAX_FILL_SECONDS) + 1;
        if slot > held_slot + max_step {
            let skipped = slot - held_slot - max_step;
            self.origin_ns = Some(origin + skipped * interval);
            debug!(skipped, "color gap longer than fill limit");
            return held_slot + max_step;
        }
        slot
    }
}

impl FrameEncoder for ColorEncoder {
    fn name(&self) -> &str {
        NAME
    }

    async fn write(&mut self, frame: &FrameEnvelope) -> Result<(), EncodingError> {
        if self.closed {
            return Err(EncodingError::Closed {
                encoder: NAME.to_string(),
            });
        }
        let FramePayload::Color(image) = &frame.payload else {
            return Err(EncodingError::unsupported(
                NAME,
                format!("expected color image, got {}", frame.stream),
            ));
        };

        if let Some(process) = &self.process {
            if (process.width, process.height) != (image.width, image.height) {
                return Err(EncodingError::ResolutionChanged {
                    encoder: NAME.to_string(),
                    expected_width: process.width,
                    expected_height: process.height,
                    width: image.width,
                    height: image.height,
                });
            }
            if process.format != image.format {
                return Err(EncodingError::unsupported(NAME, "pixel format changed mid-session"));
            }
        } else {
            let process = self.spawn(image)?;
            self.process = Some(process);
        }

        let capture_ns = frame.capture_time.as_nanos();
        let held = self.held.take();
        let slot = self.place(capture_ns, held.as_ref().map(|h| h.slot));
        let slot = match held {
            None => slot,
            Some(held) if slot <= held.slot => {
                // 同一个输出帧内到达，只保留最新的一帧
                let held_slot = held.slot;
                self.release(held, 0).await?;
                self.merged_frames += 1;
                held_slot
            }
            Some(held) => {
                let repeats = (slot - held.slot) as u32;
                if repeats > 1 {
                    debug!(sequence = frame.sequence, fill = repeats - 1, "repeating previous color frame");
                }
                self.release(held, repeats).await?;
                slot
            }
        };

        self.held = Some(HeldFrame {
            data: image.data.clone(),
            entry: IndexEntry {
                sequence: frame.sequence,
                capture_time_ns: capture_ns,
                repeats: 0,
            },
            slot,
        });
        self.frames_written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), EncodingError> {
        if let Some(stdin) = self.process.as_mut().and_then(|p| p.stdin.as_mut()) {
            stdin
                .flush()
                .await
                .map_err(|e| EncodingError::encoder(NAME, format!("ffmpeg pipe: {e}")))?;
        }
        self.index.flush().map_err(|e| EncodingError::io(NAME, e))
    }

    async fn close(&mut self) -> Result<(), EncodingError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(held) = self.held.take() {
            self.release(held, 1).await?;
        }
        self.index.flush().map_err(|e| EncodingError::io(NAME, e))?;

        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        // EOF on stdin lets ffmpeg write the trailer
        drop(process.stdin.take());
        let output = process
            .child
            .wait_with_output()
            .await
            .map_err(|e| EncodingError::encoder(NAME, format!("waiting for ffmpeg: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "ffmpeg failed");
            return Err(EncodingError::encoder(
                NAME,
                format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        info!(
            frames = self.frames_written,
            video_frames = self.video_frames,
            merged = self.merged_frames,
            "color video finalized"
        );
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

//! Depth → zstd framed file (`depth.zst`)
//!
//! Layout:
//! ```text
//! header  : "DEPTHZS1" | width u32 | height u32 | scale f32 | format u8 | 3 reserved
//! record* : compressed_len u32 | zstd frame (raw little-endian units)
//! ```
//! All integers little-endian. The header is written with the first frame, so
//! every record in a file shares one resolution.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use contracts::{
    DepthEncoderConfig, DepthFormat, DepthImage, EncodingError, FrameEncoder, FrameEnvelope,
    FramePayload,
};
use tracing::debug;
use zstd::bulk::Compressor;

use super::index::{FrameIndex, IndexEntry};

pub const DEPTH_FILE: &str = "depth.zst";
pub const DEPTH_INDEX_FILE: &str = "depth.frames.jsonl";
pub const DEPTH_MAGIC: &[u8; 8] = b"DEPTHZS1";
const HEADER_LEN: usize = 24;

const NAME: &str = "depth";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthHeader {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub format: DepthFormat,
}

impl DepthHeader {
    fn of(image: &DepthImage) -> Self {
        Self {
            width: image.width,
            height: image.height,
            scale: image.scale,
            format: image.format,
        }
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..8].copy_from_slice(DEPTH_MAGIC);
        buf[8..12].copy_from_slice(&self.width.to_le_bytes());
        buf[12..16].copy_from_slice(&self.height.to_le_bytes());
        buf[16..20].copy_from_slice(&self.scale.to_le_bytes());
        buf[20] = self.format.code();
        buf
    }

    fn parse(buf: &[u8; HEADER_LEN]) -> std::io::Result<Self> {
        if &buf[..8] != DEPTH_MAGIC {
            return Err(std::io::Error::new(ErrorKind::InvalidData, "bad depth magic"));
        }
        let word = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        let format = DepthFormat::from_code(buf[20]).ok_or_else(|| {
            std::io::Error::new(ErrorKind::InvalidData, format!("unknown depth format {}", buf[20]))
        })?;
        Ok(Self {
            width: u32::from_le_bytes(word(8)),
            height: u32::from_le_bytes(word(12)),
            scale: f32::from_le_bytes(word(16)),
            format,
        })
    }
}

pub struct DepthEncoder {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    index: FrameIndex,
    compressor: Compressor<'static>,
    header: Option<DepthHeader>,
    frames_written: u64,
}

impl DepthEncoder {
    pub fn create(dir: &Path, config: &DepthEncoderConfig) -> Result<Self, EncodingError> {
        let io = |e| EncodingError::io(NAME, e);
        let path = dir.join(DEPTH_FILE);
        let writer = BufWriter::new(File::create(&path).map_err(io)?);
        let index = FrameIndex::create(&dir.join(DEPTH_INDEX_FILE)).map_err(io)?;
        let mut compressor = Compressor::new(config.compression_level).map_err(io)?;
        compressor.include_checksum(true).map_err(io)?;
        Ok(Self {
            path,
            writer: Some(writer),
            index,
            compressor,
            header: None,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the image against the session header; `true` if the header is still to be written
    fn check_header(&self, image: &DepthImage) -> Result<bool, EncodingError> {
        let Some(header) = self.header else {
            return Ok(true);
        };
        if (header.width, header.height) != (image.width, image.height) {
            return Err(EncodingError::ResolutionChanged {
                encoder: NAME.to_string(),
                expected_width: header.width,
                expected_height: header.height,
                width: image.width,
                height: image.height,
            });
        }
        if header.format != image.format || header.scale != image.scale {
            return Err(EncodingError::unsupported(
                NAME,
                "depth format or scale changed mid-session",
            ));
        }
        Ok(false)
    }
}

impl FrameEncoder for DepthEncoder {
    fn name(&self) -> &str {
        NAME
    }

    async fn write(&mut self, frame: &FrameEnvelope) -> Result<(), EncodingError> {
        let FramePayload::Depth(image) = &frame.payload else {
            return Err(EncodingError::unsupported(
                NAME,
                format!("expected depth image, got {}", frame.stream),
            ));
        };
        let needs_header = self.check_header(image)?;
        let compressed = self
            .compressor
            .compress(&image.data)
            .map_err(|e| EncodingError::io(NAME, e))?;
        let len = u32::try_from(compressed.len())
            .map_err(|_| EncodingError::encoder(NAME, "compressed frame exceeds 4 GiB"))?;

        let io = |e| EncodingError::io(NAME, e);
        let writer = self.writer.as_mut().ok_or_else(|| EncodingError::Closed {
            encoder: NAME.to_string(),
        })?;
        if needs_header {
            let header = DepthHeader::of(image);
            writer.write_all(&header.to_bytes()).map_err(io)?;
            debug!(width = header.width, height = header.height, "depth header written");
            self.header = Some(header);
        }
        writer.write_all(&len.to_le_bytes()).map_err(io)?;
        writer.write_all(&compressed).map_err(io)?;
        self.index
            .append(&IndexEntry {
                sequence: frame.sequence,
                capture_time_ns: frame.capture_time.as_nanos(),
                repeats: 1,
            })
            .map_err(io)?;
        self.frames_written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), EncodingError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| EncodingError::io(NAME, e))?;
        }
        self.index.flush().map_err(|e| EncodingError::io(NAME, e))
    }

    async fn close(&mut self) -> Result<(), EncodingError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| EncodingError::io(NAME, e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| EncodingError::io(NAME, e))?;
            self.index.flush().map_err(|e| EncodingError::io(NAME, e))?;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

/// Sequential reader for `depth.zst`
pub struct DepthReader {
    reader: BufReader<File>,
    header: Option<DepthHeader>,
}

impl DepthReader {
    /// Open a recording; an empty file (no frame ever written) has no header
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut buf = [0u8; HEADER_LEN];
        let header = match read_exact_or_eof(&mut reader, &mut buf)? {
            true => Some(DepthHeader::parse(&buf)?),
            false => None,
        };
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> Option<DepthHeader> {
        self.header
    }

    /// Next frame; `Ok(None)` at a clean end of file
    pub fn next_frame(&mut self) -> std::io::Result<Option<DepthImage>> {
        let Some(header) = self.header else {
            return Ok(None);
        };
        let mut len = [0u8; 4];
        if !read_exact_or_eof(&mut self.reader, &mut len)? {
            return Ok(None);
        }
        let mut compressed = vec![0u8; u32::from_le_bytes(len) as usize];
        self.reader.read_exact(&mut compressed)?;
        let data = zstd::stream::decode_all(compressed.as_slice())?;
        DepthImage::new(
            header.width,
            header.height,
            header.format,
            header.scale,
            Bytes::from(data),
        )
        .map(Some)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))
    }
}

/// `false` on EOF before the first byte, error on EOF mid-buffer
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::index::read_index;
    use contracts::{CaptureTime, SensorKind};

    fn envelope(sequence: u64, width: u32, height: u32) -> FrameEnvelope {
        let values: Vec<u16> = (0..width * height).map(|i| (i as u16) * 10 + sequence as u16).collect();
        let image = DepthImage::from_u16(width, height, 0.001, &values).unwrap();
        FrameEnvelope::new(SensorKind::Camera, CaptureTime(sequence), sequence, FramePayload::Depth(image))
            .unwrap()
    }

    #[tokio::test]
    async fn test_depth_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = DepthEncoder::create(dir.path(), &DepthEncoderConfig::default()).unwrap();
        let frames: Vec<_> = (0..3).map(|seq| envelope(seq, 4, 3)).collect();
        for frame in &frames {
            encoder.write(frame).await.unwrap();
        }
        encoder.close().await.unwrap();

        let mut reader = DepthReader::open(encoder.path()).unwrap();
        let header = reader.header().unwrap();
        assert_eq!((header.width, header.height), (4, 3));
        assert_eq!(header.format, DepthFormat::U16);

        for frame in &frames {
            let FramePayload::Depth(expected) = &frame.payload else { unreachable!() };
            assert_eq!(&reader.next_frame().unwrap().unwrap(), expected);
        }
        assert!(reader.next_frame().unwrap().is_none());

        let index = read_index(&dir.path().join(DEPTH_INDEX_FILE)).unwrap();
        assert_eq!(index.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_resolution_change_is_rejected_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = DepthEncoder::create(dir.path(), &DepthEncoderConfig::default()).unwrap();
        encoder.write(&envelope(0, 4, 3)).await.unwrap();

        let err = encoder.write(&envelope(1, 8, 6)).await.unwrap_err();
        assert!(matches!(
            err,
            EncodingError::ResolutionChanged { expected_width: 4, width: 8, .. }
        ));
        encoder.close().await.unwrap();
        assert_eq!(encoder.frames_written(), 1);

        // file stays readable up to the last good frame
        let mut reader = DepthReader::open(encoder.path()).unwrap();
        assert!(reader.next_frame().unwrap().is_some());
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPTH_FILE);
        let header = DepthHeader { width: 1, height: 1, scale: 0.001, format: DepthFormat::U16 };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]);
        std::fs::write(&path, bytes).unwrap();

        let mut reader = DepthReader::open(&path).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPTH_FILE);
        std::fs::write(&path, b"").unwrap();
        let mut reader = DepthReader::open(&path).unwrap();
        assert!(reader.header().is_none());
        assert!(reader.next_frame().unwrap().is_none());
    }
}

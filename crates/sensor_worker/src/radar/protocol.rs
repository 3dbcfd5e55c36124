//! TI mmWave 串口输出协议
//!
//! 数据包格式（小端）：
//! ```text
//! magic(8) | version | total_len | platform | frame_number | cpu_cycles |
//! num_detected | num_tlvs | sub_frame          -- 40 字节包头
//! [ tlv_type u32 | tlv_len u32 | payload ]*     -- tlv_len 不含 TLV 头
//! ```
//! TLV 1: 检测点 (x, y, z, velocity) f32；TLV 7: 每点 (snr, noise) i16，单位 0.1 dB。

use bytemuck::{Pod, Zeroable};
use contracts::{ProtocolError, RadarPoint};
use tracing::trace;

pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];
pub const HEADER_LEN: usize = 40;
pub const TLV_HEADER_LEN: usize = 8;
pub const MAX_PACKET_LEN: usize = 1 << 20;

pub const TLV_DETECTED_POINTS: u32 = 1;
pub const TLV_SIDE_INFO: u32 = 7;

const SDK_VERSION: u32 = 0x0305_0004;
const PLATFORM_XWR68XX: u32 = 0x000A_6843;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PacketHeader {
    magic: [u8; 8],
    version: u32,
    total_len: u32,
    platform: u32,
    frame_number: u32,
    time_cpu_cycles: u32,
    num_detected: u32,
    num_tlvs: u32,
    sub_frame: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DetectedPoint {
    x: f32,
    y: f32,
    z: f32,
    velocity: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SideInfo {
    snr: i16,
    noise: i16,
}

#[inline]
fn le_f32(v: f32) -> f32 {
    f32::from_bits(u32::from_le(v.to_bits()))
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// One decoded device frame
#[derive(Debug, Clone, PartialEq)]
pub struct RadarPacket {
    pub frame_number: u32,
    pub points: Vec<RadarPoint>,
}

/// Decode a complete packet (`bytes.len() == total_len`)
pub fn parse_packet(bytes: &[u8]) -> Result<RadarPacket, ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }
    let header: PacketHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
    if header.magic != MAGIC_WORD {
        return Err(ProtocolError::BadHeader("missing magic word".into()));
    }
    let num_detected = u32::from_le(header.num_detected) as usize;
    let num_tlvs = u32::from_le(header.num_tlvs);

    let mut points: Vec<RadarPoint> = Vec::new();
    let mut side_info: Option<Vec<SideInfo>> = None;
    let mut offset = HEADER_LEN;

    for _ in 0..num_tlvs {
        if offset + TLV_HEADER_LEN > bytes.len() {
            return Err(ProtocolError::Truncated {
                needed: offset + TLV_HEADER_LEN,
                available: bytes.len(),
            });
        }
        let tlv_type = read_u32(bytes, offset);
        let tlv_len = read_u32(bytes, offset + 4) as usize;
        let start = offset + TLV_HEADER_LEN;
        let end = start
            .checked_add(tlv_len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| ProtocolError::BadTlv {
                tlv_type,
                offset,
                message: format!("length {tlv_len} overruns packet of {} bytes", bytes.len()),
            })?;
        let body = &bytes[start..end];

        match tlv_type {
            TLV_DETECTED_POINTS => {
                let stride = std::mem::size_of::<DetectedPoint>();
                if body.len() % stride != 0 {
                    return Err(ProtocolError::BadTlv {
                        tlv_type,
                        offset,
                        message: format!("length {} is not a multiple of {stride}", body.len()),
                    });
                }
                points = body
                    .chunks_exact(stride)
                    .map(|chunk| {
                        let p: DetectedPoint = bytemuck::pod_read_unaligned(chunk);
                        let mut point = RadarPoint::new(le_f32(p.x), le_f32(p.y), le_f32(p.z));
                        point.velocity = Some(le_f32(p.velocity));
                        point
                    })
                    .collect();
            }
            TLV_SIDE_INFO => {
                let stride = std::mem::size_of::<SideInfo>();
                if body.len() % stride != 0 {
                    return Err(ProtocolError::BadTlv {
                        tlv_type,
                        offset,
                        message: format!("length {} is not a multiple of {stride}", body.len()),
                    });
                }
                side_info = Some(
                    body.chunks_exact(stride)
                        .map(bytemuck::pod_read_unaligned::<SideInfo>)
                        .collect(),
                );
            }
            other => trace!(tlv_type = other, len = tlv_len, "skipping tlv"),
        }
        offset = end;
    }

    if points.len() != num_detected {
        return Err(ProtocolError::PointCountMismatch {
            declared: num_detected,
            actual: points.len(),
        });
    }
    if let Some(side_info) = side_info {
        if side_info.len() != points.len() {
            return Err(ProtocolError::PointCountMismatch {
                declared: points.len(),
                actual: side_info.len(),
            });
        }
        for (point, side) in points.iter_mut().zip(side_info) {
            point.intensity = Some(f32::from(i16::from_le(side.snr)) * 0.1);
        }
    }

    Ok(RadarPacket {
        frame_number: u32::from_le(header.frame_number),
        points,
    })
}

/// Encode a packet the way the device firmware does
///
/// Side info is included when any point carries an intensity.
pub fn encode_packet(frame_number: u32, points: &[RadarPoint]) -> Vec<u8> {
    let with_side_info = points.iter().any(|p| p.intensity.is_some());
    let point_bytes = points.len() * std::mem::size_of::<DetectedPoint>();
    let side_bytes = points.len() * std::mem::size_of::<SideInfo>();
    let mut total_len = HEADER_LEN + TLV_HEADER_LEN + point_bytes;
    if with_side_info {
        total_len += TLV_HEADER_LEN + side_bytes;
    }

    let header = PacketHeader {
        magic: MAGIC_WORD,
        version: SDK_VERSION.to_le(),
        total_len: (total_len as u32).to_le(),
        platform: PLATFORM_XWR68XX.to_le(),
        frame_number: frame_number.to_le(),
        time_cpu_cycles: 0,
        num_detected: (points.len() as u32).to_le(),
        num_tlvs: (if with_side_info { 2u32 } else { 1 }).to_le(),
        sub_frame: 0,
    };

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(&TLV_DETECTED_POINTS.to_le_bytes());
    out.extend_from_slice(&(point_bytes as u32).to_le_bytes());
    for p in points {
        for v in [p.x, p.y, p.z, p.velocity.unwrap_or(0.0)] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    if with_side_info {
        out.extend_from_slice(&TLV_SIDE_INFO.to_le_bytes());
        out.extend_from_slice(&(side_bytes as u32).to_le_bytes());
        for p in points {
            let snr = (p.intensity.unwrap_or(0.0) * 10.0).round() as i16;
            out.extend_from_slice(&snr.to_le_bytes());
            out.extend_from_slice(&0i16.to_le_bytes());
        }
    }
    out
}

/// Parser statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub packets: u64,
    pub errors: u64,
    pub discarded_bytes: u64,
}

/// Incremental parser over a raw UART byte stream
///
/// Resynchronises on the magic word after garbage or a malformed packet.
#[derive(Debug, Default)]
pub struct PacketParser {
    buf: Vec<u8>,
    stats: ParserStats,
}

impl PacketParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete packet, `None` when more bytes are needed
    pub fn next_packet(&mut self) -> Option<Result<RadarPacket, ProtocolError>> {
        match self
            .buf
            .windows(MAGIC_WORD.len())
            .position(|w| w == MAGIC_WORD)
        {
            None => {
                // keep a possible magic prefix at the tail
                let keep = MAGIC_WORD.len() - 1;
                let discard = self.buf.len().saturating_sub(keep);
                self.discard(discard);
                return None;
            }
            Some(pos) => self.discard(pos),
        }

        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let total_len = read_u32(&self.buf, 12) as usize;
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&total_len) {
            // skip this magic and hunt for the next one
            self.discard(1);
            self.stats.errors += 1;
            return Some(Err(ProtocolError::BadHeader(format!(
                "implausible packet length {total_len}"
            ))));
        }
        if self.buf.len() < total_len {
            return None;
        }

        let result = parse_packet(&self.buf[..total_len]);
        self.buf.drain(..total_len);
        match &result {
            Ok(_) => self.stats.packets += 1,
            Err(_) => self.stats.errors += 1,
        }
        Some(result)
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            self.buf.drain(..n);
            self.stats.discarded_bytes += n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> Vec<RadarPoint> {
        vec![
            RadarPoint {
                x: 1.0,
                y: 2.0,
                z: 0.5,
                velocity: Some(-0.75),
                intensity: Some(12.3),
            },
            RadarPoint {
                x: -3.0,
                y: 4.5,
                z: 0.0,
                velocity: Some(0.0),
                intensity: Some(8.0),
            },
        ]
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(std::mem::size_of::<PacketHeader>(), HEADER_LEN);
        assert_eq!(std::mem::size_of::<DetectedPoint>(), 16);
    }

    #[test]
    fn test_parse_encoded_packet() {
        let bytes = encode_packet(42, &sample_points());
        let packet = parse_packet(&bytes).unwrap();
        assert_eq!(packet.frame_number, 42);
        assert_eq!(packet.points.len(), 2);
        assert_eq!(packet.points[0].x, 1.0);
        assert_eq!(packet.points[0].velocity, Some(-0.75));
        assert!((packet.points[0].intensity.unwrap() - 12.3).abs() < 1e-4);
    }

    #[test]
    fn test_parser_resyncs_after_garbage() {
        let mut stream = vec![0xAA, 0xBB, 0x02, 0x01];
        stream.extend(encode_packet(1, &sample_points()));
        stream.extend([0x00, 0x11, 0x22]);
        stream.extend(encode_packet(2, &[]));

        let mut parser = PacketParser::new();
        // feed in small chunks like a UART would
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            parser.push(chunk);
            while let Some(result) = parser.next_packet() {
                frames.push(result.unwrap().frame_number);
            }
        }
        assert_eq!(frames, vec![1, 2]);
        assert_eq!(parser.stats().packets, 2);
        assert_eq!(parser.stats().discarded_bytes, 7);
    }

    #[test]
    fn test_corrupt_tlv_is_dropped_and_stream_continues() {
        let mut bad = encode_packet(3, &sample_points());
        // overwrite the first TLV length with something absurd
        bad[HEADER_LEN + 4..HEADER_LEN + 8].copy_from_slice(&0xFFFF_u32.to_le_bytes());

        let mut parser = PacketParser::new();
        parser.push(&encode_packet(2, &sample_points()));
        parser.push(&bad);
        parser.push(&encode_packet(4, &sample_points()));

        assert_eq!(parser.next_packet().unwrap().unwrap().frame_number, 2);
        assert!(matches!(
            parser.next_packet().unwrap(),
            Err(ProtocolError::BadTlv { tlv_type: 1, .. })
        ));
        assert_eq!(parser.next_packet().unwrap().unwrap().frame_number, 4);
        assert!(parser.next_packet().is_none());
        assert_eq!(parser.stats().errors, 1);
    }

    #[test]
    fn test_point_count_mismatch() {
        let mut bytes = encode_packet(5, &sample_points());
        // header claims 3 detections
        bytes[28..32].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            parse_packet(&bytes),
            Err(ProtocolError::PointCountMismatch { declared: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_implausible_length_is_bad_header() {
        let mut bytes = encode_packet(1, &[]);
        bytes[12..16].copy_from_slice(&8u32.to_le_bytes());
        let mut parser = PacketParser::new();
        parser.push(&bytes);
        assert!(matches!(
            parser.next_packet().unwrap(),
            Err(ProtocolError::BadHeader(_))
        ));
        // the remainder holds no magic word
        assert!(parser.next_packet().is_none());
    }
}

//! Length-prefixed wire codec for worker pipes
//!
//! Frame layout: `"FR" | body_len u32 LE | bincode body`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use contracts::TransportError;

pub const MAGIC: [u8; 2] = *b"FR";
pub const HEADER_SIZE: usize = 6;
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Encode one message into a complete wire frame
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    let body = bincode::serialize(message).map_err(|e| TransportError::codec(e.to_string()))?;
    if body.len() > MAX_BODY_LEN {
        return Err(TransportError::codec(format!(
            "frame body of {} bytes exceeds {MAX_BODY_LEN}",
            body.len()
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Validate a header and return the body length
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<usize, TransportError> {
    if header[..2] != MAGIC {
        return Err(TransportError::codec(format!(
            "bad frame magic {:02x}{:02x}",
            header[0], header[1]
        )));
    }
    let len = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if len > MAX_BODY_LEN {
        return Err(TransportError::codec(format!(
            "frame length {len} exceeds {MAX_BODY_LEN}"
        )));
    }
    Ok(len)
}

pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    bincode::deserialize(body).map_err(|e| TransportError::codec(e.to_string()))
}

/// Reads framed messages from a pipe
pub struct FrameReader<R> {
    inner: R,
    body: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            body: Vec::new(),
        }
    }

    /// Next message, `None` on a clean end of stream
    ///
    /// EOF in the middle of a frame is reported as `Disconnected`.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(TransportError::disconnected("eof inside frame header"));
            }
            filled += n;
        }

        let len = decode_header(&header)?;
        self.body.resize(len, 0);
        if let Err(e) = self.inner.read_exact(&mut self.body).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    TransportError::disconnected("eof inside frame body")
                }
                _ => TransportError::Io(e),
            });
        }
        decode_body(&self.body).map(Some)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes framed messages to a pipe
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one message and flush it
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        self.inner.write_all(&frame).await.map_err(map_write_error)?;
        self.inner.flush().await.map_err(map_write_error)?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await.map_err(map_write_error)
    }
}

fn map_write_error(e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
            TransportError::disconnected(e.to_string())
        }
        _ => TransportError::Io(e),
    }
}

//! FrameEncoder trait - Recorder output interface

use crate::{EncodingError, FrameEnvelope};

/// Append-only per-stream file writer
///
/// One instance belongs to exactly one recording session. Frames arrive in
/// sequence order; `close` finalizes any container trailer and is idempotent.
#[trait_variant::make(FrameEncoder: Send)]
pub trait LocalFrameEncoder {
    /// Encoder name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Append one frame
    ///
    /// # Errors
    /// I/O failures and payloads the file cannot represent (e.g. a resolution change)
    async fn write(&mut self, frame: &FrameEnvelope) -> Result<(), EncodingError>;

    /// Push buffered data to disk
    async fn flush(&mut self) -> Result<(), EncodingError>;

    /// Finalize the file
    async fn close(&mut self) -> Result<(), EncodingError>;

    /// Frames accepted so far
    fn frames_written(&self) -> u64;
}

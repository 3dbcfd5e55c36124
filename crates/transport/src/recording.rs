//! Recording subscriptions
//!
//! A recording subscription is a backpressure queue for one stream: while it is
//! installed the producer blocks instead of dropping frames.

use std::time::Duration;

use contracts::{ContractError, FrameEnvelope, StreamKey, TransportError};

use crate::queue::{QueueReceiver, QueueStats};

/// Blocking receive handle for one recorded stream
pub struct RecordingReceiver {
    key: StreamKey,
    inner: QueueReceiver,
}

impl RecordingReceiver {
    pub fn new(key: StreamKey, inner: QueueReceiver) -> Self {
        Self { key, inner }
    }

    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// Wait for the next envelope; `Disconnected` once the worker is gone and the queue is drained
    pub async fn receive(&self) -> Result<FrameEnvelope, TransportError> {
        self.inner.receive().await
    }

    pub async fn receive_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<FrameEnvelope>, TransportError> {
        self.inner.receive_timeout(timeout).await
    }

    pub fn try_receive(&self) -> Result<Option<FrameEnvelope>, TransportError> {
        self.inner.try_receive()
    }

    /// Envelopes waiting in the queue
    pub fn backlog(&self) -> usize {
        self.inner.len()
    }

    /// Stop accepting new envelopes; already queued ones stay readable
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.stats()
    }
}

impl std::fmt::Debug for RecordingReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingReceiver")
            .field("key", &self.key)
            .field("backlog", &self.inner.len())
            .finish()
    }
}

/// Anything a recorder can subscribe to
///
/// At most one recording subscription exists per stream; dropping the
/// receiver releases the slot.
pub trait RecordingSource {
    fn subscribe_for_recording(&self, key: StreamKey) -> Result<RecordingReceiver, ContractError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{FrameQueue, OverflowPolicy};
    use contracts::{CaptureTime, ColorImage, FramePayload, PixelFormat, SensorKind};

    #[tokio::test]
    async fn test_close_keeps_queued_frames() {
        let (tx, rx) = FrameQueue::bounded(4, OverflowPolicy::Backpressure);
        let receiver = RecordingReceiver::new(StreamKey::CAMERA_COLOR, rx);
        let image = ColorImage::new(1, 1, PixelFormat::Bgr8, vec![1u8, 2, 3]).unwrap();
        let env = FrameEnvelope::new(SensorKind::Camera, CaptureTime(1), 0, FramePayload::Color(image))
            .unwrap();
        tx.push(env).await.unwrap();

        receiver.close();
        assert!(tx.is_closed());
        assert_eq!(receiver.backlog(), 1);
        assert_eq!(receiver.receive().await.unwrap().sequence, 0);
        assert!(receiver.receive().await.unwrap_err().is_disconnected());
    }
}

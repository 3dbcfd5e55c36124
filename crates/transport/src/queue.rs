//! Bounded per-stream frame queue
//!
//! Two overflow policies:
//! - `DropOldest`: display path, push never blocks, the oldest frame is displaced
//! - `Backpressure`: recording path, push waits until the consumer makes room

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TryRecvError};
use contracts::{FrameEnvelope, TransportError};
use tracing::trace;

/// Overflow policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropOldest,
    Backpressure,
}

/// Queue metrics
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub pushed: AtomicU64,
    pub dropped: AtomicU64,
    pub received: AtomicU64,
}

impl QueueMetrics {
    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub dropped: u64,
    pub received: u64,
}

pub struct FrameQueue;

impl FrameQueue {
    /// Create a bounded queue
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> (QueueSender, QueueReceiver) {
        let (tx, rx) = async_channel::bounded(capacity);
        let metrics = Arc::new(QueueMetrics::default());
        (
            QueueSender {
                tx,
                policy,
                metrics: metrics.clone(),
            },
            QueueReceiver { rx, metrics },
        )
    }
}

/// Producer side
#[derive(Clone)]
pub struct QueueSender {
    tx: Sender<FrameEnvelope>,
    policy: OverflowPolicy,
    metrics: Arc<QueueMetrics>,
}

impl QueueSender {
    /// Push one envelope
    ///
    /// Returns the displaced envelope under `DropOldest` when the queue was full.
    /// Fails with `Closed` once every receiver is gone.
    pub async fn push(&self, envelope: FrameEnvelope) -> Result<Option<FrameEnvelope>, TransportError> {
        match self.policy {
            OverflowPolicy::DropOldest => self.force_push(envelope),
            OverflowPolicy::Backpressure => {
                self.tx
                    .send(envelope)
                    .await
                    .map_err(|_| TransportError::Closed)?;
                self.metrics.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Non-blocking push that always displaces the oldest envelope when full
    pub fn force_push(&self, envelope: FrameEnvelope) -> Result<Option<FrameEnvelope>, TransportError> {
        let displaced = self
            .tx
            .force_send(envelope)
            .map_err(|_| TransportError::Closed)?;
        self.metrics.pushed.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = &displaced {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(stream = %old.key(), sequence = old.sequence, "displaced oldest frame");
        }
        Ok(displaced)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Whether the consumer side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the queue; receivers drain what is left, then see `Disconnected`
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn stats(&self) -> QueueStats {
        self.metrics.snapshot()
    }
}

/// Consumer side
pub struct QueueReceiver {
    rx: Receiver<FrameEnvelope>,
    metrics: Arc<QueueMetrics>,
}

impl QueueReceiver {
    /// Non-blocking receive; `Ok(None)` when empty
    pub fn try_receive(&self) -> Result<Option<FrameEnvelope>, TransportError> {
        match self.rx.try_recv() {
            Ok(envelope) => {
                self.metrics.received.fetch_add(1, Ordering::Relaxed);
                Ok(Some(envelope))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(TransportError::disconnected("producer gone")),
        }
    }

    /// Wait for the next envelope
    pub async fn receive(&self) -> Result<FrameEnvelope, TransportError> {
        let envelope = self
            .rx
            .recv()
            .await
            .map_err(|_| TransportError::disconnected("producer gone"))?;
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        Ok(envelope)
    }

    /// Wait up to `timeout`; `Ok(None)` on timeout
    pub async fn receive_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<FrameEnvelope>, TransportError> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Drain everything queued and return the newest envelope
    pub fn drain_latest(&self) -> Result<Option<FrameEnvelope>, TransportError> {
        let mut latest = None;
        loop {
            match self.try_receive() {
                Ok(Some(envelope)) => latest = Some(envelope),
                Ok(None) => return Ok(latest),
                Err(e) => return if latest.is_some() { Ok(latest) } else { Err(e) },
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(usize::MAX)
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    pub fn close(&self) -> bool {
        self.rx.close()
    }

    pub fn stats(&self) -> QueueStats {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CaptureTime, FramePayload, PointCloudFrame, SensorKind};

    fn envelope(sequence: u64) -> FrameEnvelope {
        FrameEnvelope::new(
            SensorKind::Radar,
            CaptureTime(sequence * 1_000),
            sequence,
            FramePayload::PointCloud(PointCloudFrame::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_drop_oldest_bounds_buffer_and_keeps_newest() {
        let (tx, rx) = FrameQueue::bounded(3, OverflowPolicy::DropOldest);
        for seq in 0..10 {
            tx.push(envelope(seq)).await.unwrap();
            assert!(rx.len() <= 3);
        }
        assert_eq!(tx.stats().dropped, 7);

        let mut seen = Vec::new();
        while let Some(env) = rx.try_receive().unwrap() {
            seen.push(env.sequence);
        }
        assert_eq!(seen, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_drain_latest() {
        let (tx, rx) = FrameQueue::bounded(4, OverflowPolicy::DropOldest);
        assert!(rx.drain_latest().unwrap().is_none());
        for seq in 0..3 {
            tx.push(envelope(seq)).await.unwrap();
        }
        assert_eq!(rx.drain_latest().unwrap().unwrap().sequence, 2);
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_backpressure_blocks_producer_without_loss() {
        let (tx, rx) = FrameQueue::bounded(2, OverflowPolicy::Backpressure);
        let producer = tokio::spawn(async move {
            for seq in 0..50 {
                tx.push(envelope(seq)).await.unwrap();
            }
        });

        // producer cannot run ahead of the consumer by more than the capacity
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.len(), 2);
        assert!(!producer.is_finished());

        let mut received = Vec::new();
        while received.len() < 50 {
            received.push(rx.receive().await.unwrap().sequence);
        }
        producer.await.unwrap();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_closed_producer_reports_disconnected_after_drain() {
        let (tx, rx) = FrameQueue::bounded(4, OverflowPolicy::Backpressure);
        tx.push(envelope(0)).await.unwrap();
        drop(tx);
        assert_eq!(rx.receive().await.unwrap().sequence, 0);
        assert!(rx.receive().await.unwrap_err().is_disconnected());
        assert!(rx.try_receive().unwrap_err().is_disconnected());
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (_tx, rx) = FrameQueue::bounded(1, OverflowPolicy::Backpressure);
        let got = rx.receive_timeout(Duration::from_millis(10)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (tx, rx) = FrameQueue::bounded(1, OverflowPolicy::Backpressure);
        drop(rx);
        assert!(tx.is_closed());
        assert!(matches!(tx.push(envelope(0)).await, Err(TransportError::Closed)));
    }
}

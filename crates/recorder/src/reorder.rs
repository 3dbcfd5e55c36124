//! Reorder window
//!
//! Releases frames of one stream in strictly increasing sequence order.
//! Up to `window` frames ahead of the expected sequence are held back; when
//! the window overflows (or the stream ends) the missing range is given up
//! and reported as one drop event. Frames arriving after their slot was given
//! up are late and discarded.

use std::collections::BTreeMap;

use contracts::FrameEnvelope;

/// Output of the reorder buffer, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Ordered {
    Frame(FrameEnvelope),
    /// `missing` consecutive sequence numbers starting at `first` were never seen
    Gap { first: u64, missing: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorderStats {
    pub dropped_frames: u64,
    pub drop_events: u64,
    pub late_frames: u64,
}

#[derive(Debug)]
pub struct ReorderBuffer {
    window: usize,
    next: Option<u64>,
    pending: BTreeMap<u64, FrameEnvelope>,
    stats: ReorderStats,
}

impl ReorderBuffer {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            next: None,
            pending: BTreeMap::new(),
            stats: ReorderStats::default(),
        }
    }

    pub fn stats(&self) -> ReorderStats {
        self.stats
    }

    /// Frames held back waiting for a missing predecessor
    pub fn held(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, envelope: FrameEnvelope) -> Vec<Ordered> {
        let mut out = Vec::new();
        // first frame seen defines where the stream starts
        let next = *self.next.get_or_insert(envelope.sequence);

        if envelope.sequence < next || self.pending.contains_key(&envelope.sequence) {
            self.stats.late_frames += 1;
            return out;
        }

        self.pending.insert(envelope.sequence, envelope);
        self.release_ready(&mut out);
        while self.pending.len() > self.window {
            self.skip_gap(&mut out);
            self.release_ready(&mut out);
        }
        out
    }

    /// Give up on every missing frame and release everything held
    pub fn finish(&mut self) -> Vec<Ordered> {
        let mut out = Vec::new();
        while !self.pending.is_empty() {
            self.skip_gap(&mut out);
            self.release_ready(&mut out);
        }
        out
    }

    fn release_ready(&mut self, out: &mut Vec<Ordered>) {
        while let Some(next) = self.next {
            match self.pending.remove(&next) {
                Some(envelope) => {
                    out.push(Ordered::Frame(envelope));
                    self.next = Some(next + 1);
                }
                None => break,
            }
        }
    }

    fn skip_gap(&mut self, out: &mut Vec<Ordered>) {
        let (Some(next), Some(&first_held)) = (self.next, self.pending.keys().next()) else {
            return;
        };
        if first_held > next {
            let missing = first_held - next;
            self.stats.dropped_frames += missing;
            self.stats.drop_events += 1;
            out.push(Ordered::Gap {
                first: next,
                missing,
            });
        }
        self.next = Some(first_held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CaptureTime, FramePayload, PointCloudFrame, SensorKind, StreamKind};

    fn frame(sequence: u64) -> FrameEnvelope {
        FrameEnvelope {
            sensor: SensorKind::Radar,
            stream: StreamKind::PointCloud,
            capture_time: CaptureTime(sequence * 1_000),
            sequence,
            payload: FramePayload::PointCloud(PointCloudFrame::default()),
        }
    }

    fn sequences(items: &[Ordered]) -> Vec<u64> {
        items
            .iter()
            .filter_map(|item| match item {
                Ordered::Frame(f) => Some(f.sequence),
                Ordered::Gap { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_in_order_passes_through() {
        let mut buffer = ReorderBuffer::new(4);
        let mut out = Vec::new();
        for seq in 0..5 {
            out.extend(buffer.push(frame(seq)));
        }
        assert_eq!(sequences(&out), vec![0, 1, 2, 3, 4]);
        assert_eq!(buffer.stats(), ReorderStats::default());
    }

    #[test]
    fn test_swap_within_window_is_repaired() {
        let mut buffer = ReorderBuffer::new(4);
        let mut out = Vec::new();
        for seq in [0, 2, 1, 3] {
            out.extend(buffer.push(frame(seq)));
        }
        assert_eq!(sequences(&out), vec![0, 1, 2, 3]);
        assert_eq!(buffer.stats().drop_events, 0);
    }

    #[test]
    fn test_single_gap_is_one_drop_event() {
        let mut buffer = ReorderBuffer::new(4);
        let mut out = Vec::new();
        for seq in [0, 1, 2, 4, 5] {
            out.extend(buffer.push(frame(seq)));
        }
        assert_eq!(buffer.held(), 2);
        out.extend(buffer.finish());

        assert_eq!(sequences(&out), vec![0, 1, 2, 4, 5]);
        assert!(out.contains(&Ordered::Gap { first: 3, missing: 1 }));
        let stats = buffer.stats();
        assert_eq!(stats.drop_events, 1);
        assert_eq!(stats.dropped_frames, 1);
    }

    #[test]
    fn test_window_overflow_releases_gap() {
        let mut buffer = ReorderBuffer::new(2);
        let mut out = buffer.push(frame(0));
        out.extend(buffer.push(frame(3)));
        out.extend(buffer.push(frame(4)));
        assert_eq!(sequences(&out), vec![0]);

        // third held frame overflows the window
        out.extend(buffer.push(frame(5)));
        assert_eq!(sequences(&out), vec![0, 3, 4, 5]);
        assert_eq!(buffer.stats().dropped_frames, 2);

        // the missing frame finally shows up: too late
        assert!(buffer.push(frame(1)).is_empty());
        assert_eq!(buffer.stats().late_frames, 1);
    }

    #[test]
    fn test_zero_window_never_holds() {
        let mut buffer = ReorderBuffer::new(0);
        let out = buffer.push(frame(7));
        assert_eq!(sequences(&out), vec![7]);
        let out = buffer.push(frame(9));
        assert_eq!(sequences(&out), vec![9]);
        assert_eq!(buffer.stats().drop_events, 1);
        assert_eq!(buffer.held(), 0);
    }

    #[test]
    fn test_duplicate_is_late() {
        let mut buffer = ReorderBuffer::new(4);
        buffer.push(frame(0));
        assert!(buffer.push(frame(0)).is_empty());
        assert_eq!(buffer.stats().late_frames, 1);
    }
}

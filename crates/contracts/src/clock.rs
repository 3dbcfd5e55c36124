//! Capture clock shared across worker processes
//!
//! `Instant` cannot cross a process boundary, so the supervisor sends the
//! nanoseconds elapsed on its own epoch when a worker connects; the worker
//! continues counting from that anchor with its local `Instant`.

use std::time::Instant;

use crate::CaptureTime;

#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    anchor_ns: u64,
    origin: Instant,
}

impl CaptureClock {
    /// Anchor a clock at `anchor_ns` on the supervisor timeline
    pub fn anchored(anchor_ns: u64) -> Self {
        Self {
            anchor_ns,
            origin: Instant::now(),
        }
    }

    /// A clock starting at zero now
    pub fn local() -> Self {
        Self::anchored(0)
    }

    pub fn now(&self) -> CaptureTime {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        CaptureTime(self.anchor_ns.saturating_add(elapsed))
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic_from_anchor() {
        let clock = CaptureClock::anchored(5_000_000_000);
        let a = clock.now();
        let b = clock.now();
        assert!(a.as_nanos() >= 5_000_000_000);
        assert!(b >= a);
    }
}

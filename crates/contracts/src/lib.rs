//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - `CaptureTime` is nanoseconds on the supervisor's monotonic epoch
//! - Workers anchor a `CaptureClock` to that epoch when they connect
//! - `sequence` is per (sensor, stream) and only used for ordering/drop detection

mod blueprint;
mod clock;
mod encoder;
mod error;
mod frame;
mod sensor;
mod state;
mod wire;

pub use blueprint::*;
pub use clock::CaptureClock;
pub use encoder::{FrameEncoder, LocalFrameEncoder};
pub use error::*;
pub use frame::*;
pub use sensor::*;
pub use state::*;
pub use wire::*;

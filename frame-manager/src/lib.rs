//! Bookkeeping for the physical frames of the simulated machine: which frames
//! are free, who owns the others, which ones were recently used, and which ones
//! are pinned while their content is in transit.

use std::fmt;

pub mod bitmap;
pub mod clock;
pub mod frame_allocator;
pub mod frame_table;
pub mod pin;

pub use clock::ClockReplacer;
pub use frame_allocator::FrameAllocator;
pub use frame_table::{FrameInfo, FrameLease, FrameTable};
pub use pin::{HasFrameTable, PinCoordinator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Every frame is allocated and none can be evicted.
    OutOfFrames,
    InvalidFrame(usize),
    NotAllocated(usize),
    AlreadyPinned(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::OutOfFrames => write!(f, "no free or evictable frame"),
            FrameError::InvalidFrame(frame) => write!(f, "frame {} is out of range", frame),
            FrameError::NotAllocated(frame) => write!(f, "frame {} is not allocated", frame),
            FrameError::AlreadyPinned(frame) => write!(f, "frame {} is already pinned", frame),
        }
    }
}

impl std::error::Error for FrameError {}

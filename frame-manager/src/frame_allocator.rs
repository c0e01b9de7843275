use std::sync::{Arc, Mutex};

use log::{trace, warn};

use crate::{bitmap::Bitmap, FrameError};

/// Tracks which physical frames are free.
///
/// Clones share the same set; every call is serialized on an internal lock so
/// faults from independent processes may allocate concurrently.
#[derive(Debug, Clone)]
pub struct FrameAllocator {
    bitmap: Arc<Mutex<Bitmap>>,
}

impl FrameAllocator {
    /// Every one of the `num_frames` frames starts out free.
    pub fn init(num_frames: usize) -> Self {
        Self {
            bitmap: Arc::new(Mutex::new(Bitmap::new(num_frames))),
        }
    }

    pub fn num_frames(&self) -> usize {
        self.bitmap.lock().unwrap().len()
    }

    pub fn allocate(&self) -> Result<usize, FrameError> {
        match self.bitmap.lock().unwrap().allocate() {
            Some(frame) => {
                trace!("Allocated frame {}", frame);
                Ok(frame)
            }
            None => Err(FrameError::OutOfFrames),
        }
    }

    pub fn free(&self, frame: usize) -> Result<(), FrameError> {
        let mut bitmap = self.bitmap.lock().unwrap();
        if frame >= bitmap.len() {
            warn!("Attempted to free invalid frame {}", frame);
            return Err(FrameError::InvalidFrame(frame));
        }
        if !bitmap.is_set(frame) {
            warn!("Attempted to free frame {} which is not allocated", frame);
            return Err(FrameError::NotAllocated(frame));
        }
        bitmap.deallocate(frame);
        trace!("Freed frame {}", frame);
        Ok(())
    }

    pub fn is_allocated(&self, frame: usize) -> bool {
        let bitmap = self.bitmap.lock().unwrap();
        frame < bitmap.len() && bitmap.is_set(frame)
    }

    pub fn free_count(&self) -> usize {
        self.bitmap.lock().unwrap().count_clear()
    }
}

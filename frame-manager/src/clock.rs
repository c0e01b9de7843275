use log::trace;

use crate::frame_table::FrameTable;

/// Not-recently-used replacement: a single hand sweeping the frame table,
/// giving every used frame a second chance before it becomes a victim.
#[derive(Debug, Default, Clone)]
pub struct ClockReplacer {
    hand: usize,
}

impl ClockReplacer {
    pub fn new() -> Self {
        Self { hand: 0 }
    }

    /// The frame the next scan starts from.
    pub fn hand(&self) -> usize {
        self.hand
    }

    /// Picks the next unpinned, occupied frame whose used bit is clear,
    /// clearing used bits along the way. Gives up after two full sweeps, which
    /// only happens when no frame is evictable.
    pub fn select_victim<O: Copy>(&mut self, table: &mut FrameTable<O>) -> Option<usize> {
        let num_frames = table.len();
        if num_frames == 0 {
            return None;
        }
        self.hand %= num_frames;

        for step in 1..=2 * num_frames {
            let frame = self.hand;
            self.hand = (self.hand + 1) % num_frames;

            if !table.is_evictable(frame) {
                continue;
            }
            if table.take_used(frame) {
                continue;
            }
            trace!("Clock chose frame {} after {} steps", frame, step);
            return Some(frame);
        }
        None
    }
}

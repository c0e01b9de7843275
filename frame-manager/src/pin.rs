use std::sync::{Condvar, MutexGuard};

use log::trace;

use crate::frame_table::{FrameLease, FrameTable};

/// Mutex-protected state that holds the frame table.
pub trait HasFrameTable {
    type Owner: Copy;

    fn frames(&self) -> &FrameTable<Self::Owner>;

    fn frames_mut(&mut self) -> &mut FrameTable<Self::Owner>;
}

/// Parks threads that need a frame (or a page in transit) to settle, and wakes
/// them when a lease is released.
///
/// The coordinator owns no state of its own: the frame table lives inside the
/// caller's mutex-protected state, which exposes it through [`HasFrameTable`].
#[derive(Debug, Default)]
pub struct PinCoordinator {
    unpinned: Condvar,
}

impl PinCoordinator {
    pub fn new() -> Self {
        Self {
            unpinned: Condvar::new(),
        }
    }

    /// Releases `lease` and wakes every waiter.
    pub fn unpin<S: HasFrameTable>(&self, state: &mut S, lease: FrameLease) {
        trace!("Unpinned frame {}", lease.frame());
        state.frames_mut().unpin(lease);
        self.unpinned.notify_all();
    }

    /// Wakes every waiter without releasing anything, for callers that settle
    /// state other than a pin.
    pub fn notify(&self) {
        self.unpinned.notify_all();
    }

    /// Blocks until `frame` is no longer pinned. The guard's lock is released
    /// while waiting and held again on return.
    pub fn wait_until_unpinned<'a, S: HasFrameTable>(
        &self,
        guard: MutexGuard<'a, S>,
        frame: usize,
    ) -> MutexGuard<'a, S> {
        self.unpinned
            .wait_while(guard, |state| state.frames().is_pinned(frame))
            .unwrap()
    }

    /// Blocks until the next release, for waiters whose condition is not a
    /// single frame's pin bit. Callers re-check their condition on return.
    pub fn wait<'a, S>(&self, guard: MutexGuard<'a, S>) -> MutexGuard<'a, S> {
        self.unpinned.wait(guard).unwrap()
    }
}

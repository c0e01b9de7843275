use std::sync::MutexGuard;

use frame_manager::{FrameError, FrameLease};
use log::{trace, warn};

use super::{VirtualMemoryManager, VmState};
use crate::{
    error::VmError,
    events::{ContentSource, VmEvent},
    translation::PageId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// The page was resident by the time the fault was examined.
    AlreadyValid { frame: usize },
    Loaded { frame: usize, source: ContentSource },
}

impl FaultResolution {
    pub fn frame(&self) -> usize {
        match *self {
            FaultResolution::AlreadyValid { frame } => frame,
            FaultResolution::Loaded { frame, .. } => frame,
        }
    }
}

type Guard<'a> = MutexGuard<'a, VmState>;

impl<const PAGE_SIZE: usize> VirtualMemoryManager<PAGE_SIZE> {
    /// Makes `page` resident. Ends with the page valid in some frame or with an
    /// error; either way no frame is left pinned and no page in flight.
    pub(crate) fn handle_fault(&self, page: PageId) -> Result<FaultResolution, VmError> {
        self.stats.page_fault();
        self.events.record(VmEvent::FaultStarted { page });

        match self.resolve_fault(page) {
            Ok(resolution) => {
                let source = match resolution {
                    FaultResolution::AlreadyValid { .. } => None,
                    FaultResolution::Loaded { source, .. } => Some(source),
                };
                self.events.record(VmEvent::FaultResolved {
                    page,
                    frame: resolution.frame(),
                    source,
                });
                Ok(resolution)
            }
            Err(e) => {
                self.events.record(VmEvent::FaultFailed {
                    page,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn resolve_fault(&self, page: PageId) -> Result<FaultResolution, VmError> {
        let mut state = self.state.lock().unwrap();
        loop {
            let entry = state.entry(page)?;
            if entry.valid {
                return Ok(FaultResolution::AlreadyValid { frame: entry.ppn });
            }
            if !state.in_flight.contains_key(&page) {
                break;
            }
            trace!("{} is in flight, waiting", page);
            state = self.pins.wait(state);
        }

        let (lease, victim) = self.obtain_frame(&mut state)?;
        let frame = lease.frame();
        state.in_flight.insert(page, frame);

        if let Some(victim) = victim {
            let (guard, evicted) = self.evict(state, frame, victim);
            state = guard;
            if let Err(e) = evicted {
                // The frame went back to the victim.
                state.in_flight.remove(&page);
                self.pins.unpin(&mut *state, lease);
                return Err(e);
            }
        }

        let (guard, loaded) = self.load_content(state, page, frame);
        state = guard;
        let installed = loaded.and_then(|source| {
            state.frames.install(frame, page)?;
            state.entry_mut(page)?.install(frame);
            Ok(source)
        });

        match installed {
            Ok(source) => {
                state.in_flight.remove(&page);
                self.pins.unpin(&mut *state, lease);
                Ok(FaultResolution::Loaded { frame, source })
            }
            Err(e) => {
                self.abandon(&mut state, page, lease);
                Err(e)
            }
        }
    }

    /// A pinned frame with no valid mapping, taken from the free pool or
    /// else from the clock. In the second case the previous occupant is
    /// returned; its entry is still valid.
    fn obtain_frame(&self, state: &mut VmState) -> Result<(FrameLease, Option<PageId>), VmError> {
        if let Ok(frame) = self.allocator.allocate() {
            return match state.frames.pin(frame) {
                Ok(lease) => Ok((lease, None)),
                Err(e) => {
                    self.allocator.free(frame)?;
                    Err(e.into())
                }
            };
        }

        let frame = state
            .clock
            .select_victim(&mut state.frames)
            .ok_or(VmError::OutOfFrames)?;
        state.sync_used_bits();
        let victim = state
            .frames
            .evict(frame)?
            .ok_or(VmError::Frame(FrameError::NotAllocated(frame)))?;
        let lease = state.frames.pin(frame)?;
        Ok((lease, Some(victim)))
    }

    /// Unmaps `victim` from `frame`, writing it to swap first when dirty. On
    /// failure the victim is mapped again as it was.
    fn evict<'a>(
        &'a self,
        mut state: Guard<'a>,
        frame: usize,
        victim: PageId,
    ) -> (Guard<'a>, Result<(), VmError>) {
        let dirty = match state.entry_mut(victim) {
            Ok(entry) => {
                let dirty = entry.dirty;
                entry.invalidate();
                dirty
            }
            Err(e) => return (state, Err(e)),
        };
        self.stats.eviction();
        self.events.record(VmEvent::EvictionChosen {
            frame,
            victim,
            dirty,
        });

        if !dirty {
            self.stats.swap_skipped_clean();
            self.events.record(VmEvent::SwapSkippedClean { page: victim });
            return (state, Ok(()));
        }

        let mut bytes = vec![0; PAGE_SIZE];
        if let Err(e) = self.memory.read_frame(frame, &mut bytes) {
            self.restore_victim(&mut state, frame, victim);
            return (state, Err(e.into()));
        }

        state.in_flight.insert(victim, frame);
        drop(state);
        let written = self.swap.write(victim, &bytes);
        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(&victim);
        self.pins.notify();

        match written {
            Ok(slot) => {
                self.stats.swap_write();
                self.events.record(VmEvent::SwapWrite { page: victim, slot });
                (state, Ok(()))
            }
            Err(e) => {
                warn!("Swapping out {} failed: {}", victim, e);
                self.restore_victim(&mut state, frame, victim);
                (state, Err(e.into()))
            }
        }
    }

    fn restore_victim(&self, state: &mut VmState, frame: usize, victim: PageId) {
        if let Ok(entry) = state.entry_mut(victim) {
            entry.install(frame);
            entry.dirty = true;
        }
        if let Err(e) = state.frames.install(frame, victim) {
            warn!("Could not give frame {} back to {}: {}", frame, victim, e);
        }
    }

    /// Fills `frame` with the content of `page`: its swap slot if it has one,
    /// else its executable section, else zeros.
    fn load_content<'a>(
        &'a self,
        mut state: Guard<'a>,
        page: PageId,
        frame: usize,
    ) -> (Guard<'a>, Result<ContentSource, VmError>) {
        let slot = match self.swap.slot_of(&page) {
            Some(slot) => slot,
            None => {
                let filled = self.fill_from_image(&mut state, page, frame);
                return (state, filled);
            }
        };

        drop(state);
        let mut bytes = vec![0; PAGE_SIZE];
        let loaded = self
            .swap
            .read(slot, &mut bytes)
            .map_err(VmError::from)
            .and_then(|_| Ok(self.memory.write_frame(frame, &bytes)?));
        let state = self.state.lock().unwrap();

        match loaded {
            Ok(()) => {
                self.stats.swap_read();
                self.events.record(VmEvent::SwapRead { page, slot });
                (state, Ok(ContentSource::FromSwap { slot }))
            }
            Err(e) => {
                warn!("Swapping in {} failed: {}", page, e);
                (state, Err(e))
            }
        }
    }

    fn fill_from_image(
        &self,
        state: &mut VmState,
        page: PageId,
        frame: usize,
    ) -> Result<ContentSource, VmError> {
        let sections = state.space(page.space)?.sections.clone();
        match sections.find_section(page.vpn) {
            Some((section, index)) => {
                self.memory
                    .with_frame_mut(frame, |dst| sections.load_page(section, index, dst))??;
                state.entry_mut(page)?.read_only = sections.is_read_only(section);
                self.stats.section_load();
                self.events.record(VmEvent::SectionLoad { page, section });
                Ok(ContentSource::FromExecutableSection {
                    section,
                    page: index,
                })
            }
            None => {
                self.memory.zero_frame(frame)?;
                state.entry_mut(page)?.read_only = false;
                self.stats.zero_fill();
                self.events.record(VmEvent::ZeroFill { page });
                Ok(ContentSource::ZeroFill)
            }
        }
    }

    /// Gives up on a fault that owns `lease`: the frame returns to the free
    /// pool unmapped.
    fn abandon(&self, state: &mut VmState, page: PageId, lease: FrameLease) {
        let frame = lease.frame();
        if let Err(e) = state.frames.evict(frame) {
            warn!("Could not clear frame {}: {}", frame, e);
        }
        state.in_flight.remove(&page);
        self.pins.unpin(state, lease);
        if let Err(e) = self.allocator.free(frame) {
            warn!("Could not free frame {}: {}", frame, e);
        }
    }
}

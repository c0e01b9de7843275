//! The virtual memory manager owns every piece of paging state shared between
//! address spaces: physical memory, the frame allocator and frame table, the
//! clock hand, the swap store and the page tables themselves.
//!
//! All of it except physical memory and the swap store sits behind one mutex.
//! The mutex is dropped only around swap I/O; the frame involved stays pinned
//! and the page involved is marked in flight until the lock is taken again.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use frame_manager::{ClockReplacer, FrameAllocator, FrameTable, HasFrameTable, PinCoordinator};
use log::{debug, info, warn};
use memory::PhysicalMemory;
use swap_store::SwapStore;

use crate::{
    config::VmConfig,
    error::VmError,
    events::EventLog,
    section::SectionProvider,
    stats::{StatsSnapshot, VmStats},
    translation::{PageId, PageTable, SpaceId, TranslationEntry},
};

mod fault;
#[cfg(test)]
mod tests;

pub use fault::FaultResolution;

pub(crate) struct SpaceRecord {
    table: PageTable,
    sections: Arc<dyn SectionProvider>,
}

pub(crate) struct VmState {
    frames: FrameTable<PageId>,
    clock: ClockReplacer,
    spaces: HashMap<SpaceId, SpaceRecord>,
    /// Pages being written to or read from swap, and the frame involved.
    in_flight: HashMap<PageId, usize>,
    next_space: SpaceId,
}

impl VmState {
    fn space(&self, space: SpaceId) -> Result<&SpaceRecord, VmError> {
        self.spaces.get(&space).ok_or(VmError::UnknownAddressSpace)
    }

    fn entry(&self, page: PageId) -> Result<&TranslationEntry, VmError> {
        self.space(page.space)?.table.get(page.vpn)
    }

    fn entry_mut(&mut self, page: PageId) -> Result<&mut TranslationEntry, VmError> {
        self.spaces
            .get_mut(&page.space)
            .ok_or(VmError::UnknownAddressSpace)?
            .table
            .get_mut(page.vpn)
    }

    /// Copies the clock's view of the used bits back into the entries of
    /// resident pages.
    fn sync_used_bits(&mut self) {
        let Self { frames, spaces, .. } = self;
        for (_, info) in frames.iter() {
            if let Some(owner) = info.owner {
                if let Some(entry) = spaces
                    .get_mut(&owner.space)
                    .and_then(|record| record.table.get_mut(owner.vpn).ok())
                {
                    entry.used = info.used;
                }
            }
        }
    }
}

impl HasFrameTable for VmState {
    type Owner = PageId;

    fn frames(&self) -> &FrameTable<PageId> {
        &self.frames
    }

    fn frames_mut(&mut self) -> &mut FrameTable<PageId> {
        &mut self.frames
    }
}

pub(crate) enum Access<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

pub struct VirtualMemoryManager<const PAGE_SIZE: usize> {
    config: VmConfig,
    memory: PhysicalMemory<PAGE_SIZE>,
    allocator: FrameAllocator,
    swap: SwapStore<PageId, PAGE_SIZE>,
    state: Mutex<VmState>,
    pins: PinCoordinator,
    events: EventLog,
    stats: VmStats,
}

impl<const PAGE_SIZE: usize> VirtualMemoryManager<PAGE_SIZE> {
    /// Brings up physical memory with every frame free and creates the swap
    /// file, truncating any left over from an earlier run.
    pub fn init(config: VmConfig) -> Result<Arc<Self>, VmError> {
        let memory = PhysicalMemory::create(config.num_frames);
        let allocator = FrameAllocator::init(config.num_frames);
        let swap = SwapStore::open(&config.swap_file)?;
        info!(
            "Virtual memory up: {} frames of {} bytes, swap file {}",
            config.num_frames, PAGE_SIZE, config.swap_file
        );

        Ok(Arc::new(Self {
            memory,
            allocator,
            swap,
            state: Mutex::new(VmState {
                frames: FrameTable::new(config.num_frames),
                clock: ClockReplacer::new(),
                spaces: HashMap::new(),
                in_flight: HashMap::new(),
                next_space: 1,
            }),
            pins: PinCoordinator::new(),
            events: EventLog::new(config.record_events),
            stats: VmStats::default(),
            config,
        }))
    }

    /// Waits for pending frame transfers, then removes the swap file. Safe to
    /// call more than once.
    pub fn shutdown(&self) -> Result<(), VmError> {
        let mut state = self.state.lock().unwrap();
        for frame in 0..state.frames.len() {
            state = self.pins.wait_until_unpinned(state, frame);
        }
        self.swap.close()?;
        info!("Virtual memory shut down");
        Ok(())
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn memory(&self) -> &PhysicalMemory<PAGE_SIZE> {
        &self.memory
    }

    pub fn swap(&self) -> &SwapStore<PageId, PAGE_SIZE> {
        &self.swap
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn num_frames(&self) -> usize {
        self.allocator.num_frames()
    }

    pub fn free_frames(&self) -> usize {
        self.allocator.free_count()
    }

    /// The page held by each frame, indexed by frame number.
    pub fn frame_owners(&self) -> Vec<Option<PageId>> {
        let state = self.state.lock().unwrap();
        state.frames.iter().map(|(_, info)| info.owner).collect()
    }

    pub fn entry(&self, page: PageId) -> Result<TranslationEntry, VmError> {
        let state = self.state.lock().unwrap();
        state.entry(page).copied()
    }

    pub(crate) fn create_space(
        &self,
        num_pages: usize,
        sections: Arc<dyn SectionProvider>,
    ) -> SpaceId {
        let mut state = self.state.lock().unwrap();
        let space = state.next_space;
        state.next_space += 1;
        state.spaces.insert(
            space,
            SpaceRecord {
                table: PageTable::new(num_pages),
                sections,
            },
        );
        debug!("Created address space {} with {} pages", space, num_pages);
        space
    }

    /// Frees every resident frame and every swap slot of `space`. Waits for
    /// the space's pages that are in flight to land first.
    pub(crate) fn destroy_space(&self, space: SpaceId) -> Result<(), VmError> {
        let mut state = self.state.lock().unwrap();
        while state.in_flight.keys().any(|page| page.space == space) {
            state = self.pins.wait(state);
        }
        let record = state
            .spaces
            .remove(&space)
            .ok_or(VmError::UnknownAddressSpace)?;

        let mut frames = 0;
        for frame in record.table.resident_frames() {
            state.frames.evict(frame)?;
            self.allocator.free(frame)?;
            frames += 1;
        }
        drop(state);

        let slots = self.swap.release_matching(|page| page.space == space);
        debug!(
            "Destroyed address space {}: freed {} frames and {} swap slots",
            space, frames, slots
        );
        Ok(())
    }

    /// Copies between `access` and one page, faulting the page in as often
    /// as needed until the copy happens with the page resident.
    pub(crate) fn access(
        &self,
        page: PageId,
        offset: usize,
        mut access: Access<'_>,
    ) -> Result<(), VmError> {
        let mut state = self.state.lock().unwrap();
        loop {
            let entry = *state.entry(page)?;
            if !entry.valid {
                drop(state);
                self.handle_fault(page)?;
                state = self.state.lock().unwrap();
                continue;
            }

            let address = entry.ppn * PAGE_SIZE + offset;
            let wrote = match &mut access {
                Access::Read(buf) => {
                    self.memory.read(address, buf)?;
                    false
                }
                Access::Write(bytes) => {
                    if entry.read_only {
                        return Err(VmError::ReadOnlyViolation { vpn: page.vpn });
                    }
                    self.memory.write(address, bytes)?;
                    true
                }
            };

            let current = state.entry_mut(page)?;
            current.used = true;
            current.dirty |= wrote;
            state.frames.mark_used(entry.ppn)?;
            return Ok(());
        }
    }
}

impl<const PAGE_SIZE: usize> Drop for VirtualMemoryManager<PAGE_SIZE> {
    fn drop(&mut self) {
        if let Err(e) = self.swap.close() {
            warn!("Could not remove swap file {}: {}", self.config.swap_file, e);
        }
    }
}

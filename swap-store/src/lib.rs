use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    hash::Hash,
    sync::Mutex,
};

use disk::{Disk, DiskError};
use log::{debug, trace};

#[derive(Debug)]
pub enum SwapError {
    Disk(DiskError),
    IncorrectPageSize(usize),
    UnknownSlot(usize),
    Closed,
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapError::Disk(e) => write!(f, "swap file error: {}", e),
            SwapError::IncorrectPageSize(len) => {
                write!(f, "buffer of {} bytes does not match the page size", len)
            }
            SwapError::UnknownSlot(slot) => write!(f, "swap slot {} does not exist", slot),
            SwapError::Closed => write!(f, "swap file is closed"),
        }
    }
}

impl std::error::Error for SwapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SwapError::Disk(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DiskError> for SwapError {
    fn from(e: DiskError) -> Self {
        SwapError::Disk(e)
    }
}

#[derive(Debug)]
struct SlotMap<K> {
    by_page: HashMap<K, usize>,
    free: BTreeSet<usize>,
    total: usize,
    closed: bool,
}

/// Page-sized slots in an append-only backing file, each holding the last
/// written content of one evicted page.
///
/// A slot belongs to at most one page identity at a time. Released slots are
/// reused lowest-first before the file is extended; the file is never
/// compacted. The page-to-slot map lives only in memory.
#[derive(Debug)]
pub struct SwapStore<K, const PAGE_SIZE: usize> {
    disk: Disk<PAGE_SIZE>,
    slots: Mutex<SlotMap<K>>,
}

impl<K: Eq + Hash + Copy + fmt::Debug, const PAGE_SIZE: usize> SwapStore<K, PAGE_SIZE> {
    /// Creates (or truncates) the backing file `name`.
    pub fn open(name: &str) -> Result<Self, SwapError> {
        let disk = Disk::create(name)?;
        debug!("Swap store opened on {}", name);
        Ok(Self {
            disk,
            slots: Mutex::new(SlotMap {
                by_page: HashMap::new(),
                free: BTreeSet::new(),
                total: 0,
                closed: false,
            }),
        })
    }

    fn allocate_locked(&self, slots: &mut SlotMap<K>) -> Result<usize, SwapError> {
        if slots.closed {
            return Err(SwapError::Closed);
        }
        if let Some(slot) = slots.free.pop_first() {
            trace!("Reusing swap slot {}", slot);
            return Ok(slot);
        }
        let slot = self.disk.grow()?;
        slots.total = slot + 1;
        trace!("Extended swap file with slot {}", slot);
        Ok(slot)
    }

    /// Returns a free slot, extending the file by one page when none is free.
    /// The slot is not bound to any page.
    pub fn allocate_slot(&self) -> Result<usize, SwapError> {
        let mut slots = self.slots.lock().unwrap();
        self.allocate_locked(&mut slots)
    }

    /// Gives back a slot obtained from [`SwapStore::allocate_slot`].
    pub fn free_slot(&self, slot: usize) -> Result<(), SwapError> {
        let mut slots = self.slots.lock().unwrap();
        if slot >= slots.total || slots.by_page.values().any(|&s| s == slot) {
            return Err(SwapError::UnknownSlot(slot));
        }
        slots.free.insert(slot);
        Ok(())
    }

    pub fn slot_of(&self, page: &K) -> Option<usize> {
        self.slots.lock().unwrap().by_page.get(page).copied()
    }

    pub fn contains(&self, page: &K) -> bool {
        self.slot_of(page).is_some()
    }

    /// Stores `bytes` as the content of `page`, binding it to a slot first if
    /// it has none. Returns the slot written.
    pub fn write(&self, page: K, bytes: &[u8]) -> Result<usize, SwapError> {
        if bytes.len() != PAGE_SIZE {
            return Err(SwapError::IncorrectPageSize(bytes.len()));
        }
        let (slot, fresh) = {
            let mut slots = self.slots.lock().unwrap();
            if slots.closed {
                return Err(SwapError::Closed);
            }
            match slots.by_page.get(&page) {
                Some(&slot) => (slot, false),
                None => {
                    let slot = self.allocate_locked(&mut slots)?;
                    slots.by_page.insert(page, slot);
                    (slot, true)
                }
            }
        };

        if let Err(e) = self.disk.write_block(slot, bytes) {
            if fresh {
                let mut slots = self.slots.lock().unwrap();
                slots.by_page.remove(&page);
                slots.free.insert(slot);
            }
            return Err(e.into());
        }
        trace!("Wrote {:?} to swap slot {}", page, slot);
        Ok(slot)
    }

    pub fn read(&self, slot: usize, buf: &mut [u8]) -> Result<(), SwapError> {
        if buf.len() != PAGE_SIZE {
            return Err(SwapError::IncorrectPageSize(buf.len()));
        }
        {
            let slots = self.slots.lock().unwrap();
            if slots.closed {
                return Err(SwapError::Closed);
            }
            if slot >= slots.total {
                return Err(SwapError::UnknownSlot(slot));
            }
        }
        self.disk.read_block(slot, buf)?;
        trace!("Read swap slot {}", slot);
        Ok(())
    }

    /// Unbinds `page` from its slot and returns the slot to the free set.
    pub fn release(&self, page: &K) -> Option<usize> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.by_page.remove(page)?;
        slots.free.insert(slot);
        Some(slot)
    }

    /// Releases every page for which `pred` holds. Returns how many slots were
    /// freed.
    pub fn release_matching(&self, pred: impl Fn(&K) -> bool) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let released: Vec<(K, usize)> = slots
            .by_page
            .iter()
            .filter(|(page, _)| pred(page))
            .map(|(&page, &slot)| (page, slot))
            .collect();
        for (page, slot) in &released {
            slots.by_page.remove(page);
            slots.free.insert(*slot);
        }
        released.len()
    }

    /// Slots the backing file currently holds.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().unwrap().total
    }

    pub fn free_slot_count(&self) -> usize {
        self.slots.lock().unwrap().free.len()
    }

    pub fn bound_slot_count(&self) -> usize {
        self.slots.lock().unwrap().by_page.len()
    }

    pub fn file_len(&self) -> Result<u64, SwapError> {
        Ok(self.disk.len_bytes()?)
    }

    /// Removes the backing file. Bindings survive, so a page that was swapped
    /// out still finds its slot and reading it fails with [`SwapError::Closed`].
    /// Calling it again is a no-op.
    pub fn close(&self) -> Result<(), SwapError> {
        let mut slots = self.slots.lock().unwrap();
        if slots.closed {
            return Ok(());
        }
        slots.closed = true;
        slots.free.clear();
        self.disk.clone().remove()?;
        debug!("Swap store on {} closed", self.disk.name());
        Ok(())
    }
}

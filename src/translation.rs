use std::fmt;

use crate::error::VmError;

/// Handed out by the manager, never reused while it runs.
pub type SpaceId = u32;

/// A virtual page, named by the address space that owns it. Virtual page
/// numbers alone repeat across address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub space: SpaceId,
    pub vpn: usize,
}

impl PageId {
    pub fn new(space: SpaceId, vpn: usize) -> Self {
        Self { space, vpn }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.space, self.vpn)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: usize,
    pub ppn: usize,
    pub valid: bool,
    pub read_only: bool,
    pub used: bool,
    pub dirty: bool,
}

impl TranslationEntry {
    pub fn new(vpn: usize) -> Self {
        Self {
            vpn,
            ..Default::default()
        }
    }

    pub(crate) fn install(&mut self, ppn: usize) {
        self.ppn = ppn;
        self.valid = true;
        self.used = true;
        self.dirty = false;
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
        self.used = false;
        self.dirty = false;
    }
}

/// Splits a virtual address into its page number and the offset inside it.
pub fn split_address<const PAGE_SIZE: usize>(vaddr: usize) -> (usize, usize) {
    (vaddr / PAGE_SIZE, vaddr % PAGE_SIZE)
}

/// One entry per virtual page, for the lifetime of the address space.
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<TranslationEntry>,
}

impl PageTable {
    pub fn new(num_pages: usize) -> Self {
        Self {
            entries: (0..num_pages).map(TranslationEntry::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, vpn: usize) -> Result<&TranslationEntry, VmError> {
        self.entries.get(vpn).ok_or(VmError::InvalidAddress { vpn })
    }

    pub fn get_mut(&mut self, vpn: usize) -> Result<&mut TranslationEntry, VmError> {
        self.entries
            .get_mut(vpn)
            .ok_or(VmError::InvalidAddress { vpn })
    }

    /// Frames held by valid entries.
    pub fn resident_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.valid)
            .map(|entry| entry.ppn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }
}

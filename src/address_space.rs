use std::{
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, warn};

use crate::{
    error::VmError,
    section::SectionProvider,
    translation::{split_address, PageId, SpaceId, TranslationEntry},
    vmm::{Access, FaultResolution, VirtualMemoryManager},
};

/// When an address space's pages get frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingStrategy {
    /// Every page is faulted in at creation. Creation fails if there are not
    /// enough free frames for all of them.
    Eager,
    /// Pages get frames on first access.
    #[default]
    Demand,
}

/// Result of a byte transfer between a caller's buffer and virtual memory.
#[derive(Debug)]
#[must_use]
pub struct Transfer {
    /// Bytes moved before the transfer stopped.
    pub bytes: usize,
    /// Why the transfer stopped short, if it did.
    pub stopped: Option<VmError>,
}

impl Transfer {
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }
}

/// The virtual memory of one process.
///
/// Entries live in the manager so that a fault in any address space can
/// evict a page of any other. Dropping the address space destroys it.
pub struct AddressSpace<const PAGE_SIZE: usize> {
    id: SpaceId,
    vmm: Arc<VirtualMemoryManager<PAGE_SIZE>>,
    num_pages: usize,
    strategy: PagingStrategy,
    destroyed: AtomicBool,
}

impl<const PAGE_SIZE: usize> AddressSpace<PAGE_SIZE> {
    pub fn new(
        vmm: &Arc<VirtualMemoryManager<PAGE_SIZE>>,
        num_pages: usize,
        sections: Arc<dyn SectionProvider>,
        strategy: PagingStrategy,
    ) -> Result<Self, VmError> {
        if strategy == PagingStrategy::Eager && num_pages > vmm.free_frames() {
            warn!(
                "Insufficient physical memory: {} pages wanted, {} frames free",
                num_pages,
                vmm.free_frames()
            );
            return Err(VmError::OutOfFrames);
        }

        let space = Self {
            id: vmm.create_space(num_pages, sections),
            vmm: vmm.clone(),
            num_pages,
            strategy,
            destroyed: AtomicBool::new(false),
        };
        if strategy == PagingStrategy::Eager {
            for vpn in 0..num_pages {
                space.fault(vpn)?;
            }
        }
        Ok(space)
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn strategy(&self) -> PagingStrategy {
        self.strategy
    }

    pub fn vmm(&self) -> &Arc<VirtualMemoryManager<PAGE_SIZE>> {
        &self.vmm
    }

    fn page(&self, vpn: usize) -> PageId {
        PageId::new(self.id, vpn)
    }

    pub fn entry(&self, vpn: usize) -> Result<TranslationEntry, VmError> {
        self.vmm.entry(self.page(vpn))
    }

    /// Physical frame and offset backing `vaddr`, without faulting.
    pub fn translate(&self, vaddr: usize) -> Result<(usize, usize), VmError> {
        let (vpn, offset) = split_address::<PAGE_SIZE>(vaddr);
        let entry = self.entry(vpn)?;
        if !entry.valid {
            return Err(VmError::PageFault { vpn });
        }
        Ok((entry.ppn, offset))
    }

    /// Makes page `vpn` resident.
    pub fn fault(&self, vpn: usize) -> Result<FaultResolution, VmError> {
        self.vmm.handle_fault(self.page(vpn))
    }

    fn transfer(
        &self,
        vaddr: usize,
        len: usize,
        mut copy: impl FnMut(PageId, usize, Range<usize>) -> Result<(), VmError>,
    ) -> Transfer {
        let mut done = 0;
        while done < len {
            let (vpn, offset) = match vaddr.checked_add(done) {
                Some(address) => split_address::<PAGE_SIZE>(address),
                None => {
                    return Transfer {
                        bytes: done,
                        stopped: Some(VmError::InvalidAddress { vpn: usize::MAX }),
                    }
                }
            };
            let chunk = (PAGE_SIZE - offset).min(len - done);
            if let Err(e) = copy(self.page(vpn), offset, done..done + chunk) {
                debug!("Transfer in space {} stopped at vpn {}: {}", self.id, vpn, e);
                return Transfer {
                    bytes: done,
                    stopped: Some(e),
                };
            }
            done += chunk;
        }
        Transfer {
            bytes: done,
            stopped: None,
        }
    }

    /// Copies from virtual memory at `vaddr` into `buf`, page by page.
    pub fn read_bytes(&self, vaddr: usize, buf: &mut [u8]) -> Transfer {
        let len = buf.len();
        self.transfer(vaddr, len, |page, offset, range| {
            self.vmm.access(page, offset, Access::Read(&mut buf[range]))
        })
    }

    /// Copies `bytes` into virtual memory at `vaddr`. Stops before the first
    /// byte of a read-only page.
    pub fn write_bytes(&self, vaddr: usize, bytes: &[u8]) -> Transfer {
        self.transfer(vaddr, bytes.len(), |page, offset, range| {
            self.vmm.access(page, offset, Access::Write(&bytes[range]))
        })
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes. `None` when no
    /// terminator shows up in the bytes that could be read.
    pub fn read_string(&self, vaddr: usize, max_len: usize) -> Option<String> {
        let mut buf = vec![0; max_len + 1];
        let transfer = self.read_bytes(vaddr, &mut buf);
        let nul = buf[..transfer.bytes].iter().position(|&b| b == 0)?;
        Some(String::from_utf8_lossy(&buf[..nul]).into_owned())
    }

    /// Returns every frame and swap slot of this address space. Later calls
    /// do nothing.
    pub fn destroy(&self) -> Result<(), VmError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.vmm.destroy_space(self.id)
    }
}

impl<const PAGE_SIZE: usize> Drop for AddressSpace<PAGE_SIZE> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!("Destroying address space {} failed: {}", self.id, e);
        }
    }
}

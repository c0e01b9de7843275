//! Turning a program image into a running address space.
//!
//! Layout, from virtual address 0 up: the program's sections back to back,
//! `STACK_PAGES` pages of stack growing down from `initial_sp`, then one page
//! holding the argument vector.

use std::sync::Arc;

use log::{debug, warn};

use crate::{
    address_space::{AddressSpace, PagingStrategy},
    error::VmError,
    section::SectionProvider,
    vmm::VirtualMemoryManager,
    STACK_PAGES,
};

/// Longest argument string read back by [`read_arguments`].
pub const MAX_ARG_LEN: usize = 256;

/// Register values a new process starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessImage {
    pub num_pages: usize,
    pub initial_pc: usize,
    pub initial_sp: usize,
    pub argc: usize,
    /// Virtual address of the argument pointer array.
    pub argv: usize,
}

/// Loads `program` into a fresh address space and writes `args` into its
/// argument page.
pub fn load<const PAGE_SIZE: usize>(
    vmm: &Arc<VirtualMemoryManager<PAGE_SIZE>>,
    program: Arc<dyn SectionProvider>,
    args: &[&str],
    strategy: PagingStrategy,
) -> Result<(AddressSpace<PAGE_SIZE>, ProcessImage), VmError> {
    let mut num_pages = 0;
    for section in 0..program.section_count() {
        if program.first_vpn(section) != num_pages {
            warn!("Fragmented executable at section {}", section);
            return Err(VmError::FragmentedExecutable { section });
        }
        num_pages += program.length_in_pages(section);
    }

    let args_size: usize = args.iter().map(|arg| 4 + arg.len() + 1).sum();
    if args_size > PAGE_SIZE {
        warn!("Arguments need {} bytes, a page holds {}", args_size, PAGE_SIZE);
        return Err(VmError::ArgumentsTooLong { size: args_size });
    }

    num_pages += STACK_PAGES;
    let initial_sp = num_pages * PAGE_SIZE;
    num_pages += 1;
    debug!(
        "Loading program: {} pages, {} sections",
        num_pages,
        program.section_count()
    );

    let initial_pc = program.entry_point();
    let space = AddressSpace::new(vmm, num_pages, program, strategy)?;

    let argv = (num_pages - 1) * PAGE_SIZE;
    let mut entry_offset = argv;
    let mut string_offset = argv + args.len() * 4;
    for arg in args {
        write_all(&space, entry_offset, &(string_offset as u32).to_le_bytes())?;
        entry_offset += 4;
        write_all(&space, string_offset, arg.as_bytes())?;
        string_offset += arg.len();
        write_all(&space, string_offset, &[0])?;
        string_offset += 1;
    }

    let image = ProcessImage {
        num_pages,
        initial_pc,
        initial_sp,
        argc: args.len(),
        argv,
    };
    Ok((space, image))
}

fn write_all<const PAGE_SIZE: usize>(
    space: &AddressSpace<PAGE_SIZE>,
    vaddr: usize,
    bytes: &[u8],
) -> Result<(), VmError> {
    let transfer = space.write_bytes(vaddr, bytes);
    match transfer.stopped {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Reads back `argc` strings through the pointer array at `argv`. Stops at
/// the first pointer or string that cannot be read.
pub fn read_arguments<const PAGE_SIZE: usize>(
    space: &AddressSpace<PAGE_SIZE>,
    argv: usize,
    argc: usize,
) -> Vec<String> {
    let mut args = Vec::with_capacity(argc);
    for i in 0..argc {
        let mut pointer = [0; 4];
        if !space.read_bytes(argv + i * 4, &mut pointer).is_complete() {
            break;
        }
        match space.read_string(u32::from_le_bytes(pointer) as usize, MAX_ARG_LEN) {
            Some(arg) => args.push(arg),
            None => break,
        }
    }
    args
}

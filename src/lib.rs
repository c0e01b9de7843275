//! A demand-paged virtual memory manager for a simulated single-core machine.
//!
//! Address spaces share a fixed pool of physical frames. Pages get frames on
//! first access, and when none is free the clock picks a victim, which is
//! written to a swap file if dirty.

pub mod address_space;
pub mod config;
pub mod error;
pub mod events;
pub mod meta_commands;
pub mod process;
pub mod repl;
pub mod section;
pub mod stats;
pub mod translation;
pub mod vmm;

/// Bytes per page and per frame.
pub const PAGE_SIZE: usize = 1024;
/// Stack pages given to every process.
pub const STACK_PAGES: usize = 8;

pub use address_space::{AddressSpace, PagingStrategy, Transfer};
pub use config::VmConfig;
pub use error::VmError;
pub use events::{ContentSource, EventLog, VmEvent};
pub use process::ProcessImage;
pub use section::{Program, Section, SectionError, SectionProvider};
pub use stats::StatsSnapshot;
pub use translation::{PageId, SpaceId, TranslationEntry};
pub use vmm::{FaultResolution, VirtualMemoryManager};

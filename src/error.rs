use std::fmt;

use frame_manager::FrameError;
use memory::MemoryError;
use swap_store::SwapError;

use crate::section::SectionError;

#[derive(Debug)]
pub enum VmError {
    /// The virtual page lies outside the address space.
    InvalidAddress { vpn: usize },
    /// No free frame and no evictable one.
    OutOfFrames,
    Io(SwapError),
    ReadOnlyViolation { vpn: usize },
    /// The page is not resident; raised by translation, which never faults.
    PageFault { vpn: usize },
    UnknownAddressSpace,
    Section(SectionError),
    Frame(FrameError),
    Memory(MemoryError),
    FragmentedExecutable { section: usize },
    ArgumentsTooLong { size: usize },
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::InvalidAddress { vpn } => write!(f, "virtual page {} is out of range", vpn),
            VmError::OutOfFrames => write!(f, "insufficient physical memory"),
            VmError::Io(e) => write!(f, "swap I/O failed: {}", e),
            VmError::ReadOnlyViolation { vpn } => {
                write!(f, "virtual page {} is read-only", vpn)
            }
            VmError::PageFault { vpn } => write!(f, "virtual page {} is not resident", vpn),
            VmError::UnknownAddressSpace => write!(f, "address space no longer exists"),
            VmError::Section(e) => write!(f, "{}", e),
            VmError::Frame(e) => write!(f, "{}", e),
            VmError::Memory(e) => write!(f, "{}", e),
            VmError::FragmentedExecutable { section } => {
                write!(f, "section {} does not follow the previous one", section)
            }
            VmError::ArgumentsTooLong { size } => {
                write!(f, "arguments need {} bytes, more than one page", size)
            }
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VmError::Io(e) => Some(e),
            VmError::Section(e) => Some(e),
            VmError::Frame(e) => Some(e),
            VmError::Memory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SwapError> for VmError {
    fn from(e: SwapError) -> Self {
        VmError::Io(e)
    }
}

impl From<FrameError> for VmError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::OutOfFrames => VmError::OutOfFrames,
            e => VmError::Frame(e),
        }
    }
}

impl From<MemoryError> for VmError {
    fn from(e: MemoryError) -> Self {
        VmError::Memory(e)
    }
}

impl From<SectionError> for VmError {
    fn from(e: SectionError) -> Self {
        VmError::Section(e)
    }
}
